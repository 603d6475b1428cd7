//! Attributes: tagged, opaque payloads chained onto set nodes.
//!
//! An attribute is a `(tag, payload)` pair; payloads are trait objects
//! the kernel never interprets. Streams round-trip them through per-tag
//! registered readers; a tag with no reader falls back to a plain text
//! payload so nothing is lost.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::{FLAG_MASK, WRIT_BIT};

/// An opaque attribute payload.
pub trait UserAttribute: Send + Sync {
    /// One line of stream payload.
    fn payload(&self) -> String;

    /// Downcast hook for consumers.
    fn as_any(&self) -> &dyn Any;
}

/// The default payload: a line of text.
pub struct TextAttribute(String);

impl TextAttribute {
    /// The text carried.
    pub fn text(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TextAttribute {
    fn from(s: &str) -> Self {
        TextAttribute(s.to_owned())
    }
}

impl UserAttribute for TextAttribute {
    fn payload(&self) -> String {
        self.0.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct AttrNode {
    tag: i32,
    payload: Arc<dyn UserAttribute>,
    next: Option<Attribute>,
    flags: AtomicU32,
}

/// One link of an attribute chain on a set node.
#[derive(Clone)]
pub struct Attribute(Arc<AttrNode>);

impl Attribute {
    /// A single attribute with no successor.
    pub fn new(tag: i32, payload: Arc<dyn UserAttribute>) -> Attribute {
        Attribute::cons(tag, payload, None)
    }

    /// An attribute linked in front of `next`.
    pub fn cons(tag: i32, payload: Arc<dyn UserAttribute>, next: Option<Attribute>) -> Attribute {
        Attribute(Arc::new(AttrNode {
            tag,
            payload,
            next,
            flags: AtomicU32::new(0),
        }))
    }

    /// A copy of this attribute linked in front of `next`.
    pub fn cons_before(&self, next: Option<Attribute>) -> Attribute {
        Attribute::cons(self.tag(), self.payload(), next)
    }

    /// The tag.
    pub fn tag(&self) -> i32 {
        self.0.tag
    }

    /// The payload.
    pub fn payload(&self) -> Arc<dyn UserAttribute> {
        self.0.payload.clone()
    }

    /// The rest of the chain.
    pub fn next(&self) -> Option<Attribute> {
        self.0.next.clone()
    }

    /// Iterate over the chain in order.
    pub fn iter(&self) -> AttributeIter {
        AttributeIter {
            cur: Some(self.clone()),
        }
    }

    /// The node identity, used as the shared-node address on streams.
    pub fn unique(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// The user-visible flag bits.
    pub fn flags(&self) -> u32 {
        self.0.flags.load(Ordering::Relaxed) & FLAG_MASK
    }

    /// Set flag bits.
    pub fn set_flags(&self, f: u32) {
        self.0.flags.fetch_or(f & FLAG_MASK, Ordering::Relaxed);
    }

    /// Clear flag bits.
    pub fn reset_flags(&self, f: u32) {
        self.0.flags.fetch_and(!(f & FLAG_MASK), Ordering::Relaxed);
    }

    /// Mark this node written; returns whether it already was.
    pub fn mark_written(&self) -> bool {
        self.0.flags.fetch_or(WRIT_BIT, Ordering::Relaxed) & WRIT_BIT != 0
    }

    /// Clear the written mark on this node alone.
    pub fn unwrite_node(&self) {
        self.0.flags.fetch_and(!WRIT_BIT, Ordering::Relaxed);
    }
}

impl PartialEq for Attribute {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Attribute {}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attribute({}, {:?})", self.tag(), self.0.payload.payload())
    }
}

/// Iterator over an attribute chain.
pub struct AttributeIter {
    cur: Option<Attribute>,
}

impl Iterator for AttributeIter {
    type Item = Attribute;
    fn next(&mut self) -> Option<Attribute> {
        let n = self.cur.take()?;
        self.cur = n.next();
        Some(n)
    }
}

type AttributeReader = fn(&str) -> Arc<dyn UserAttribute>;

fn readers() -> &'static RwLock<HashMap<i32, AttributeReader>> {
    static READERS: OnceLock<RwLock<HashMap<i32, AttributeReader>>> = OnceLock::new();
    READERS.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Register the stream reader for an attribute tag.
pub fn register_attribute_reader(tag: i32, reader: AttributeReader) {
    readers()
        .write()
        .expect("attribute reader registry poisoned")
        .insert(tag, reader);
}

/// Rebuild a payload read from a stream. Tags without a registered
/// reader round-trip as text.
pub fn read_attribute_payload(tag: i32, payload: &str) -> Arc<dyn UserAttribute> {
    let reader = readers()
        .read()
        .expect("attribute reader registry poisoned")
        .get(&tag)
        .copied();
    match reader {
        Some(r) => r(payload),
        None => Arc::new(TextAttribute::from(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_order() {
        let c = Attribute::new(3, Arc::new(TextAttribute::from("c")));
        let b = Attribute::cons(2, Arc::new(TextAttribute::from("b")), Some(c));
        let a = Attribute::cons(1, Arc::new(TextAttribute::from("a")), Some(b));
        let tags: Vec<i32> = a.iter().map(|n| n.tag()).collect();
        assert_eq!(tags, vec![1, 2, 3]);
    }

    #[test]
    fn test_payload_roundtrip_default() {
        let p = read_attribute_payload(42, "metal oxide");
        assert_eq!(p.payload(), "metal oxide");
    }

    #[test]
    fn test_registered_reader() {
        struct Count(usize);
        impl UserAttribute for Count {
            fn payload(&self) -> String {
                self.0.to_string()
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }
        register_attribute_reader(77, |s| Arc::new(Count(s.trim().parse().unwrap_or(0))));
        let p = read_attribute_payload(77, "12");
        assert_eq!(p.payload(), "12");
        assert!(p.as_any().downcast_ref::<Count>().is_some());
    }
}
