//! Serializes/deserializes the compiled function-prototype tree (spec.md
//! §4.F, §6): a 12-byte header followed by the recursive `Proto` body.
//! Bit-exact interop with upstream Lua's own `.luac` files is out of
//! scope (spec.md §1 lists the bytecode file format as an external
//! collaborator) — this format matches the documented header and field
//! order but is only required to round-trip with itself.

mod header;
mod reader;
mod writer;

pub use reader::read_proto;
pub use writer::write_proto;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    fn code_matches(a: &crate::compiler::Proto, b: &crate::compiler::Proto) -> bool {
        a.code == b.code
            && a.num_params == b.num_params
            && a.is_vararg == b.is_vararg
            && a.sub_protos.len() == b.sub_protos.len()
            && a.sub_protos
                .iter()
                .zip(&b.sub_protos)
                .all(|(x, y)| code_matches(x, y))
    }

    #[test]
    fn round_trips_through_write_and_read() {
        let proto = compile("local function f(n) return n * 2 end return f(21)", "test").unwrap();
        let bytes = write_proto(&proto, false);
        let back = read_proto(&bytes).unwrap();
        assert!(code_matches(&proto, &back));
    }

    #[test]
    fn rejects_bad_signature() {
        let err = read_proto(&[0u8; 20]);
        assert!(err.is_err());
    }

    #[test]
    fn strip_drops_debug_info() {
        let proto = compile("local x = 1 return x", "test").unwrap();
        let bytes = write_proto(&proto, true);
        let back = read_proto(&bytes).unwrap();
        assert!(back.debug.lines.is_empty());
        assert!(back.debug.locals.is_empty());
    }
}
