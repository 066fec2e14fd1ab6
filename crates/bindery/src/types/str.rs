use crate::{
    heap::HeapId,
    types::{PyTrait, Type},
};

/// An immutable string value.
#[derive(Debug)]
pub(crate) struct Str(String);

impl Str {
    #[must_use]
    pub fn new(s: String) -> Self {
        Self(s)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PyTrait for Str {
    fn py_type(&self) -> Type {
        Type::Str
    }

    fn py_estimate_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.0.len()
    }

    fn py_dec_ref_ids(&mut self, _stack: &mut Vec<HeapId>) {}

    fn py_traverse(&self, _visit: &mut impl FnMut(HeapId)) {}
}

/// Writes the quoted repr of `s`, choosing double quotes only when that avoids escaping.
pub(crate) fn string_repr_fmt(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}
