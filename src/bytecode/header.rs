//! The fixed 12-byte header every bytecode image starts with (spec.md §6).

pub const SIGNATURE: &[u8; 4] = b"\x1bLua";
pub const LUA_VERSION: u8 = 0x51;
pub const FORMAT_OFFICIAL: u8 = 0;
pub const LITTLE_ENDIAN: u8 = 1;

pub const SIZE_INT: u8 = 4;
pub const SIZE_SIZE_T: u8 = 4;
pub const SIZE_INSTRUCTION: u8 = 4;
pub const SIZE_NUMBER: u8 = 8;
pub const NUMBER_IS_INTEGER: u8 = 0;

/// Validated copy of the 12 header bytes. Every field but `signature` and
/// `version` is checked against this implementation's fixed widths —
/// there's no cross-width interop story here (spec.md §1 lists the
/// bytecode file format's bit-exactness as an external collaborator, out
/// of scope).
pub struct Header;

impl Header {
    pub fn write(buf: &mut Vec<u8>) {
        buf.extend_from_slice(SIGNATURE);
        buf.push(LUA_VERSION);
        buf.push(FORMAT_OFFICIAL);
        buf.push(LITTLE_ENDIAN);
        buf.push(SIZE_INT);
        buf.push(SIZE_SIZE_T);
        buf.push(SIZE_INSTRUCTION);
        buf.push(SIZE_NUMBER);
        buf.push(NUMBER_IS_INTEGER);
    }

    pub fn read(bytes: &[u8]) -> Result<(), String> {
        if bytes.len() < 12 {
            return Err("truncated bytecode header".to_string());
        }
        if &bytes[0..4] != SIGNATURE {
            return Err("not a bytecode chunk".to_string());
        }
        if bytes[4] != LUA_VERSION {
            return Err(format!("version mismatch (got 0x{:02x})", bytes[4]));
        }
        if bytes[5] != FORMAT_OFFICIAL {
            return Err("unsupported bytecode format".to_string());
        }
        if bytes[6] != LITTLE_ENDIAN {
            return Err("unsupported byte order".to_string());
        }
        if bytes[7] != SIZE_INT || bytes[8] != SIZE_SIZE_T || bytes[9] != SIZE_INSTRUCTION {
            return Err("unsupported integer/size_t/instruction width".to_string());
        }
        if bytes[10] != SIZE_NUMBER || bytes[11] != NUMBER_IS_INTEGER {
            return Err("unsupported number representation".to_string());
        }
        Ok(())
    }

    pub const LEN: usize = 12;
}
