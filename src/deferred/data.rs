use super::promise::Promise;
use crate::error::DeferredBuildError;
use crate::response::ResponseInit;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix of the string that stands in for a pending field in critical data.
pub const PLACEHOLDER_PREFIX: &str = "__deferred_promise:";

/// Stable address of a field inside one loader's data tree (`a.b.c`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    #[must_use]
    pub fn root(key: &str) -> Self {
        FieldPath(vec![key.to_string()])
    }

    /// Split on `.`. Empty segments are dropped.
    #[must_use]
    pub fn parse(path: &str) -> Self {
        FieldPath(
            path.split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    #[must_use]
    pub fn child(&self, key: &str) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.to_string());
        FieldPath(keys)
    }

    fn prefixed(mut self, key: &str) -> Self {
        self.0.insert(0, key.to_string());
        self
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.0
    }

    /// Look the path up inside a JSON object tree.
    #[must_use]
    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(value, |node, key| node.get(key))
    }

    /// The placeholder string used for this path in critical data.
    #[must_use]
    pub fn placeholder(&self) -> String {
        format!("{PLACEHOLDER_PREFIX}{self}")
    }

    /// Inverse of [`FieldPath::placeholder`].
    #[must_use]
    pub fn from_placeholder(value: &Value) -> Option<Self> {
        value
            .as_str()
            .and_then(|s| s.strip_prefix(PLACEHOLDER_PREFIX))
            .map(FieldPath::parse)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl Serialize for FieldPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FieldPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FieldPath::parse(&s))
    }
}

/// Index of a pending value in a container's slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

/// One field of a deferred container.
#[derive(Debug)]
pub enum Field {
    Immediate(Value),
    Pending(SlotId),
    Nested(BTreeMap<String, Field>),
}

/// A pending field and the promise that will fill it.
#[derive(Debug)]
pub struct DeferredSlot {
    pub id: SlotId,
    pub path: FieldPath,
    pub promise: Promise,
}

/// Loader output mixing immediate data with pending promises.
///
/// Every `Field::Pending` in the tree refers to exactly one slot and every
/// slot is referenced exactly once; the builder is the only way to make one.
#[derive(Debug)]
pub struct DeferredData {
    fields: BTreeMap<String, Field>,
    slots: Vec<DeferredSlot>,
    init: ResponseInit,
}

/// The container split into its parts, for the assembler.
#[derive(Debug)]
pub struct DeferredParts {
    pub fields: BTreeMap<String, Field>,
    pub slots: Vec<DeferredSlot>,
    pub init: ResponseInit,
}

impl DeferredData {
    #[must_use]
    pub fn init(&self) -> &ResponseInit {
        &self.init
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.init.status
    }

    /// Number of fields still waiting on a promise.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn pending_paths(&self) -> Vec<&FieldPath> {
        self.slots.iter().map(|s| &s.path).collect()
    }

    #[must_use]
    pub fn into_parts(self) -> DeferredParts {
        DeferredParts {
            fields: self.fields,
            slots: self.slots,
            init: self.init,
        }
    }

    /// Block until every promise settles and return the full tree. Rejected
    /// fields become `{"__error": message}`.
    #[must_use]
    pub fn wait_all(self) -> Value {
        let DeferredParts { fields, slots, .. } = self.into_parts();
        let settled: Vec<Value> = slots
            .into_iter()
            .map(|slot| match slot.promise.wait() {
                super::Settlement::Resolved(v) => v,
                super::Settlement::Rejected(e) => serde_json::json!({ "__error": e.to_string() }),
            })
            .collect();
        critical_value(&fields, &mut |id| {
            settled.get(id.0).cloned().unwrap_or(Value::Null)
        })
    }
}

/// Render the field tree as JSON, asking `pending` what to put in each slot.
pub fn critical_value(
    fields: &BTreeMap<String, Field>,
    pending: &mut dyn FnMut(SlotId) -> Value,
) -> Value {
    let mut out = Map::new();
    for (key, field) in fields {
        let value = match field {
            Field::Immediate(v) => v.clone(),
            Field::Pending(id) => pending(*id),
            Field::Nested(inner) => critical_value(inner, pending),
        };
        out.insert(key.clone(), value);
    }
    Value::Object(out)
}

/// Start building a deferred container.
#[must_use]
pub fn defer() -> DeferredBuilder {
    DeferredBuilder::default()
}

/// Builder for [`DeferredData`]. The first invalid call is remembered and
/// reported by [`DeferredBuilder::build`].
#[derive(Debug, Default)]
pub struct DeferredBuilder {
    fields: BTreeMap<String, Field>,
    slots: Vec<DeferredSlot>,
    init: ResponseInit,
    error: Option<DeferredBuildError>,
}

impl DeferredBuilder {
    fn check_key(&mut self, key: &str) -> bool {
        if self.error.is_some() {
            return false;
        }
        if key.is_empty() || key.contains('.') {
            self.error = Some(DeferredBuildError::InvalidKey(key.to_string()));
            return false;
        }
        if self.fields.contains_key(key) {
            self.error = Some(DeferredBuildError::DuplicateField(FieldPath::root(key)));
            return false;
        }
        true
    }

    #[must_use]
    pub fn value(mut self, key: &str, value: impl Into<Value>) -> Self {
        if self.check_key(key) {
            self.fields
                .insert(key.to_string(), Field::Immediate(value.into()));
        }
        self
    }

    #[must_use]
    pub fn pending(mut self, key: &str, promise: Promise) -> Self {
        if self.check_key(key) {
            let id = SlotId(self.slots.len());
            self.slots.push(DeferredSlot {
                id,
                path: FieldPath::root(key),
                promise,
            });
            self.fields.insert(key.to_string(), Field::Pending(id));
        }
        self
    }

    /// Nest another builder's fields under `key`. Its status and headers are
    /// ignored.
    #[must_use]
    pub fn nested(mut self, key: &str, inner: DeferredBuilder) -> Self {
        if let Some(err) = inner.error {
            if self.error.is_none() {
                self.error = Some(err);
            }
            return self;
        }
        if self.check_key(key) {
            let offset = self.slots.len();
            for slot in inner.slots {
                self.slots.push(DeferredSlot {
                    id: SlotId(slot.id.0 + offset),
                    path: slot.path.prefixed(key),
                    promise: slot.promise,
                });
            }
            let nested = inner
                .fields
                .into_iter()
                .map(|(k, f)| (k, rebase(f, offset)))
                .collect();
            self.fields.insert(key.to_string(), Field::Nested(nested));
        }
        self
    }

    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.init.status = status;
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.init = self.init.with_header(name, value);
        self
    }

    #[must_use]
    pub fn init(mut self, init: ResponseInit) -> Self {
        self.init = init;
        self
    }

    pub fn build(self) -> Result<DeferredData, DeferredBuildError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(DeferredData {
            fields: self.fields,
            slots: self.slots,
            init: self.init,
        })
    }
}

fn rebase(field: Field, offset: usize) -> Field {
    match field {
        Field::Pending(id) => Field::Pending(SlotId(id.0 + offset)),
        Field::Nested(map) => Field::Nested(
            map.into_iter()
                .map(|(k, f)| (k, rebase(f, offset)))
                .collect(),
        ),
        immediate => immediate,
    }
}
