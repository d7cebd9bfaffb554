use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;

/// Response headers as returned by the wrapped handler.
///
/// Entries are kept exactly as the handler produced them, duplicates
/// included, since they are what the host sends. Lookups are ASCII
/// case-insensitive; until [`Headers::normalize`] runs they are a linear scan
/// returning the first match, afterwards they go through a lowercase side
/// index holding one folded value per name.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, Bytes)>,
    index: Option<HashMap<String, Bytes>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.append(name, value);
        self
    }

    /// Append a header, keeping the index current if one was built.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<Bytes>) {
        let name = name.into();
        let value = value.into();
        if let Some(index) = self.index.as_mut() {
            fold_into(index, &name, &value);
        }
        self.entries.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        match &self.index {
            Some(index) => index.get(&name.to_ascii_lowercase()),
            None => self
                .entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v),
        }
    }

    /// Build the lookup index. Case-insensitive duplicates are folded into
    /// one indexed value joined with `", "`; the entries themselves are left
    /// untouched.
    pub fn normalize(&mut self) {
        if self.index.is_some() {
            return;
        }
        let mut index = HashMap::with_capacity(self.entries.len());
        for (name, value) in &self.entries {
            fold_into(&mut index, name, value);
        }
        self.index = Some(index);
    }

    pub fn is_normalized(&self) -> bool {
        self.index.is_some()
    }

    /// Number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bytes)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<Bytes>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.append(k, v);
        }
        headers
    }
}

fn fold_into(index: &mut HashMap<String, Bytes>, name: &str, value: &Bytes) {
    index
        .entry(name.to_ascii_lowercase())
        .and_modify(|existing| *existing = join_values(existing, value))
        .or_insert_with(|| value.clone());
}

fn join_values(a: &Bytes, b: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(a.len() + 2 + b.len());
    buf.put_slice(a);
    buf.put_slice(b", ");
    buf.put_slice(b);
    buf.freeze()
}
