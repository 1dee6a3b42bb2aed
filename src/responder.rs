//! Nested value decoder.
//!
//! Some responses carry a nested structure delivered as a flat sequence of
//! typed events: `array(2), value(a), array(1), value(b)` means `[a, [b]]`.
//! [`Responder`] rebuilds the tree with an explicit stack of open arrays
//! and hands each finished top-level value to its consumer exactly once,
//! then starts over for the next structure.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use bytes::Bytes;
//! use fraggle_client::{Event, Responder, Value};
//!
//! let out = Rc::new(RefCell::new(Vec::new()));
//! let sink = out.clone();
//! let mut responder = Responder::new(move |v| sink.borrow_mut().push(v));
//!
//! responder.receive(Event::Array(2));
//! responder.receive(Event::Value(Bytes::from_static(b"a")));
//! responder.receive(Event::Status("OK".into()));
//!
//! assert_eq!(
//!     *out.borrow(),
//!     vec![Value::Array(vec![Value::Data(Bytes::from_static(b"a")), Value::Status("OK".into())])]
//! );
//! ```

use std::fmt;

use bytes::Bytes;

use crate::error::{FraggleError, Result};

/// A decoded (possibly nested) value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Data(Bytes),
    Array(Vec<Value>),
    /// In-band error reported for one element.
    Error(String),
    Status(String),
}

/// One event of a flat value stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The next `n` resolved values form one array.
    Array(usize),
    Value(Bytes),
    Error(String),
    Status(String),
}

impl Event {
    /// Parse a named event.
    ///
    /// # Errors
    ///
    /// `UnknownEventKind` for names other than `array`, `value`, `error`
    /// and `status`; `Protocol` for an array count that is not a decimal
    /// number.
    pub fn parse(name: &str, payload: Bytes) -> Result<Event> {
        match name {
            "array" => {
                let count = std::str::from_utf8(&payload)
                    .ok()
                    .and_then(|s| s.trim().parse::<usize>().ok())
                    .ok_or_else(|| {
                        FraggleError::Protocol(format!("Invalid array count {:?}", payload))
                    })?;
                Ok(Event::Array(count))
            }
            "value" => Ok(Event::Value(payload)),
            "error" => Ok(Event::Error(String::from_utf8_lossy(&payload).into_owned())),
            "status" => Ok(Event::Status(String::from_utf8_lossy(&payload).into_owned())),
            other => Err(FraggleError::UnknownEventKind(other.to_string())),
        }
    }
}

struct Frame {
    expected: usize,
    items: Vec<Value>,
}

/// Rebuilds nested values from an event stream.
pub struct Responder {
    stack: Vec<Frame>,
    consumer: Box<dyn FnMut(Value)>,
}

impl Responder {
    pub fn new(consumer: impl FnMut(Value) + 'static) -> Self {
        Self {
            stack: Vec::new(),
            consumer: Box::new(consumer),
        }
    }

    /// Feed one event.
    pub fn receive(&mut self, event: Event) {
        let value = match event {
            Event::Array(0) => Value::Array(Vec::new()),
            Event::Array(expected) => {
                self.stack.push(Frame {
                    expected,
                    items: Vec::with_capacity(expected.min(1024)),
                });
                return;
            }
            Event::Value(data) => Value::Data(data),
            Event::Error(message) => Value::Error(message),
            Event::Status(status) => Value::Status(status),
        };
        self.resolve(value);
    }

    /// Parse and feed a named event.
    ///
    /// A bad event abandons the structure being decoded; the next event
    /// starts a fresh one.
    pub fn receive_event(&mut self, name: &str, payload: Bytes) -> Result<()> {
        match Event::parse(name, payload) {
            Ok(event) => {
                self.receive(event);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(error = %e, depth = self.depth(), "discarding partial value");
                self.reset();
                Err(e)
            }
        }
    }

    /// Drop any partially decoded structure.
    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// Number of arrays currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_idle(&self) -> bool {
        self.stack.is_empty()
    }

    fn resolve(&mut self, mut value: Value) {
        loop {
            let Some(top) = self.stack.last_mut() else {
                (self.consumer)(value);
                return;
            };

            top.items.push(value);
            if top.items.len() < top.expected {
                return;
            }

            let Some(done) = self.stack.pop() else {
                return;
            };
            value = Value::Array(done.items);
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("depth", &self.stack.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn setup() -> (Responder, Rc<RefCell<Vec<Value>>>) {
        let out = Rc::new(RefCell::new(Vec::new()));
        let sink = out.clone();
        (Responder::new(move |v| sink.borrow_mut().push(v)), out)
    }

    fn data(s: &'static str) -> Value {
        Value::Data(Bytes::from_static(s.as_bytes()))
    }

    fn value(s: &'static str) -> Event {
        Event::Value(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_scalar_resolves_immediately() {
        let (mut r, out) = setup();
        r.receive(value("x"));
        r.receive(Event::Error("boom".into()));
        r.receive(Event::Status("OK".into()));

        assert_eq!(
            *out.borrow(),
            vec![data("x"), Value::Error("boom".into()), Value::Status("OK".into())]
        );
    }

    #[test]
    fn test_nested_arrays() {
        let (mut r, out) = setup();
        r.receive(Event::Array(2));
        r.receive(value("x"));
        r.receive(Event::Array(1));
        assert_eq!(r.depth(), 2);
        r.receive(value("y"));

        assert_eq!(
            *out.borrow(),
            vec![Value::Array(vec![data("x"), Value::Array(vec![data("y")])])]
        );
        assert!(r.is_idle());
    }

    #[test]
    fn test_consumer_called_once_per_structure() {
        let (mut r, out) = setup();
        r.receive(Event::Array(1));
        r.receive(value("a"));
        r.receive(Event::Array(2));
        r.receive(value("b"));
        assert_eq!(out.borrow().len(), 1);
        r.receive(value("c"));

        assert_eq!(
            *out.borrow(),
            vec![
                Value::Array(vec![data("a")]),
                Value::Array(vec![data("b"), data("c")]),
            ]
        );
    }

    #[test]
    fn test_empty_array() {
        let (mut r, out) = setup();
        r.receive(Event::Array(0));
        r.receive(Event::Array(2));
        r.receive(Event::Array(0));
        r.receive(value("z"));

        assert_eq!(
            *out.borrow(),
            vec![
                Value::Array(vec![]),
                Value::Array(vec![Value::Array(vec![]), data("z")]),
            ]
        );
    }

    #[test]
    fn test_deep_nesting() {
        let (mut r, out) = setup();
        for _ in 0..100 {
            r.receive(Event::Array(1));
        }
        r.receive(value("leaf"));

        let mut expected = data("leaf");
        for _ in 0..100 {
            expected = Value::Array(vec![expected]);
        }
        assert_eq!(*out.borrow(), vec![expected]);
    }

    #[test]
    fn test_parse_events() {
        assert_eq!(
            Event::parse("array", Bytes::from_static(b"3")).unwrap(),
            Event::Array(3)
        );
        assert_eq!(
            Event::parse("status", Bytes::from_static(b"OK")).unwrap(),
            Event::Status("OK".into())
        );
        assert!(matches!(
            Event::parse("array", Bytes::from_static(b"three")),
            Err(FraggleError::Protocol(_))
        ));
        assert!(matches!(
            Event::parse("blob", Bytes::new()),
            Err(FraggleError::UnknownEventKind(name)) if name == "blob"
        ));
    }

    #[test]
    fn test_unknown_event_resets() {
        let (mut r, out) = setup();
        r.receive_event("array", Bytes::from_static(b"2")).unwrap();
        r.receive_event("value", Bytes::from_static(b"x")).unwrap();

        let err = r.receive_event("bogus", Bytes::new()).unwrap_err();
        assert!(matches!(err, FraggleError::UnknownEventKind(_)));
        assert!(r.is_idle());

        r.receive_event("value", Bytes::from_static(b"y")).unwrap();
        assert_eq!(*out.borrow(), vec![data("y")]);
    }
}
