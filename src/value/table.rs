//! Hybrid array+hash table backing `Value::Table`.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::AHashMap;

use super::Value;

/// A hashable, identity-comparable projection of `Value` used as a table
/// key. `Value` itself can't implement `Eq`/`Hash` (floats), so table
/// storage keys on this instead.
#[derive(Clone, PartialEq, Eq, Hash)]
enum Key {
    Bool(bool),
    Int(i64),
    Bits(u64),
    Str(Rc<str>),
    Table(usize),
    Closure(usize),
}

impl Key {
    /// Returns `None` for `nil` (not a legal table key) and for NaN
    /// (Lua rejects NaN keys too; we just treat it as "no such key").
    fn from_value(v: &Value) -> Option<Key> {
        match v {
            Value::Nil => None,
            Value::Bool(b) => Some(Key::Bool(*b)),
            Value::Number(n) => {
                if n.is_nan() {
                    None
                } else if let Some(i) = v.as_integer() {
                    Some(Key::Int(i))
                } else {
                    Some(Key::Bits(n.to_bits()))
                }
            }
            Value::Str(s) => Some(Key::Str(s.clone())),
            Value::Table(t) => Some(Key::Table(Rc::as_ptr(t) as usize)),
            Value::Closure(c) => Some(Key::Closure(Rc::as_ptr(c) as usize)),
        }
    }
}

/// One hash-part slot. Insertion order is the traversal order; a
/// tombstone (`None`) marks a removed entry so indices stay stable for
/// `next`.
struct Slot {
    key: Value,
    value: Value,
}

#[derive(Default)]
pub struct Table {
    /// 1-indexed conceptually: `array[i]` holds Lua index `i + 1`.
    array: Vec<Value>,
    hash_order: Vec<Option<Slot>>,
    hash_index: AHashMap<Key, usize>,
    metatable: Option<Rc<RefCell<Table>>>,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn with_capacity(array_hint: usize, hash_hint: usize) -> Table {
        Table {
            array: Vec::with_capacity(array_hint),
            hash_order: Vec::with_capacity(hash_hint),
            hash_index: AHashMap::with_capacity(hash_hint),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<Rc<RefCell<Table>>> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, meta: Option<Rc<RefCell<Table>>>) {
        self.metatable = meta;
    }

    /// `#t` — the length of the array part only.
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    pub fn get(&self, key: &Value) -> Value {
        if let Some(i) = key.as_integer() {
            if i >= 1 && (i as usize) <= self.array.len() {
                return self.array[i as usize - 1].clone();
            }
        }
        let Some(k) = Key::from_value(key) else {
            return Value::Nil;
        };
        match self.hash_index.get(&k) {
            Some(&idx) => self.hash_order[idx]
                .as_ref()
                .map(|s| s.value.clone())
                .unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn get_str(&self, key: &str) -> Value {
        self.get(&Value::string(key))
    }

    /// `set(t, k, v)`. Appending to the array absorbs a contiguous hash
    /// run; nil'ing an existing array slot demotes the tail back into the
    /// hash part.
    pub fn set(&mut self, key: Value, value: Value) {
        if let Some(i) = key.as_integer() {
            if i >= 1 && (i as usize) <= self.array.len() {
                let idx = i as usize - 1;
                if value.is_nil() && idx + 1 == self.array.len() {
                    self.array.pop();
                    self.demote_tail_after_truncate();
                } else if value.is_nil() {
                    self.array[idx] = Value::Nil;
                    self.demote_from(idx);
                } else {
                    self.array[idx] = value;
                }
                return;
            }
            if i as usize == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.absorb_from_hash();
                return;
            }
        }
        let Some(k) = Key::from_value(&key) else {
            return;
        };
        if value.is_nil() {
            if let Some(idx) = self.hash_index.remove(&k) {
                self.hash_order[idx] = None;
            }
            return;
        }
        if let Some(&idx) = self.hash_index.get(&k) {
            self.hash_order[idx] = Some(Slot { key, value });
        } else {
            let idx = self.hash_order.len();
            self.hash_order.push(Some(Slot { key, value }));
            self.hash_index.insert(k, idx);
        }
    }

    /// After nil'ing `array[idx]`, every slot after it must move back
    /// into the hash part and the array truncates at `idx`.
    fn demote_from(&mut self, idx: usize) {
        let tail: Vec<Value> = self.array.split_off(idx + 1);
        self.array.truncate(idx);
        for (offset, v) in tail.into_iter().enumerate() {
            if !v.is_nil() {
                self.set(Value::integer((idx + 2 + offset) as i64), v);
            }
        }
    }

    fn demote_tail_after_truncate(&mut self) {
        while matches!(self.array.last(), Some(v) if v.is_nil()) {
            self.array.pop();
        }
    }

    /// After an append, pull in any contiguous run of integer keys
    /// already sitting in the hash part.
    fn absorb_from_hash(&mut self) {
        loop {
            let next = self.array.len() as i64 + 1;
            let k = Key::Int(next);
            let Some(idx) = self.hash_index.remove(&k) else {
                break;
            };
            let Some(slot) = self.hash_order[idx].take() else {
                break;
            };
            self.array.push(slot.value);
        }
    }

    /// `next(key)` traversal: array part first (ascending), then the
    /// hash part in insertion order. `Value::Nil` starts the traversal.
    pub fn next(&self, key: &Value) -> Option<(Value, Value)> {
        let array_start = if key.is_nil() {
            Some(0usize)
        } else if let Some(i) = key.as_integer() {
            (i >= 1 && (i as usize) <= self.array.len()).then_some(i as usize)
        } else {
            None
        };

        if let Some(start) = array_start {
            for (offset, v) in self.array.iter().enumerate().skip(start) {
                if !v.is_nil() {
                    return Some((Value::integer(offset as i64 + 1), v.clone()));
                }
            }
            return self.next_hash_from(0);
        }

        let k = Key::from_value(key)?;
        let idx = *self.hash_index.get(&k)?;
        self.next_hash_from(idx + 1)
    }

    fn next_hash_from(&self, start: usize) -> Option<(Value, Value)> {
        self.hash_order
            .iter()
            .skip(start)
            .flatten()
            .next()
            .map(|s| (s.key.clone(), s.value.clone()))
    }

    /// Full ordered traversal, used by `pairs`.
    pub fn iter_ordered(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        let array_part = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::integer(i as i64 + 1), v.clone()));
        let hash_part = self
            .hash_order
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| (s.key.clone(), s.value.clone()));
        array_part.chain(hash_part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_table() -> Table {
        Table::new()
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut t = new_table();
        t.set(Value::string("k"), Value::integer(7));
        assert!(t.get(&Value::string("k")).raw_eq(&Value::integer(7)));
    }

    #[test]
    fn set_nil_erases() {
        let mut t = new_table();
        t.set(Value::string("k"), Value::integer(7));
        t.set(Value::string("k"), Value::Nil);
        assert!(t.get(&Value::string("k")).is_nil());
    }

    #[test]
    fn contiguous_prefix_length() {
        let mut t = new_table();
        t.set(Value::integer(1), Value::integer(10));
        t.set(Value::integer(2), Value::integer(20));
        t.set(Value::integer(3), Value::integer(30));
        assert_eq!(t.array_len(), 3);
    }

    #[test]
    fn append_absorbs_contiguous_hash_run() {
        let mut t = new_table();
        t.set(Value::integer(1), Value::integer(10));
        // key 3 lands in the hash part since the array isn't there yet.
        t.set(Value::integer(3), Value::integer(30));
        t.set(Value::integer(2), Value::integer(20));
        assert_eq!(t.array_len(), 3);
        assert!(t.get(&Value::integer(3)).raw_eq(&Value::integer(30)));
    }

    #[test]
    fn nil_in_middle_demotes_tail() {
        let mut t = new_table();
        t.set(Value::integer(1), Value::integer(10));
        t.set(Value::integer(2), Value::integer(20));
        t.set(Value::integer(3), Value::integer(30));
        t.set(Value::integer(2), Value::Nil);
        assert_eq!(t.array_len(), 1);
        assert!(t.get(&Value::integer(3)).raw_eq(&Value::integer(30)));
    }

    #[test]
    fn next_visits_array_before_hash() {
        let mut t = new_table();
        t.set(Value::integer(1), Value::integer(10));
        t.set(Value::string("a"), Value::integer(1));
        let (k0, v0) = t.next(&Value::Nil).unwrap();
        assert!(k0.raw_eq(&Value::integer(1)));
        assert!(v0.raw_eq(&Value::integer(10)));
        let (k1, _) = t.next(&k0).unwrap();
        assert!(k1.raw_eq(&Value::string("a")));
        assert!(t.next(&k1).is_none());
    }
}
