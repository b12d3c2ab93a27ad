//! Typed key-value props bags and ordered merge resolution.
//!
//! Prop spreading is an explicit ordered merge over typed bags. `PropsBag`
//! is the data currency handed to
//! the wrapped view; [`ResolvedProps`] is the full per-render surface:
//! merged data props, the current bound broadcasters and remote methods, and
//! the cable control object.
//!
//! # Precedence
//!
//! Later sources override earlier ones on key collision:
//!
//! ```text
//! passthrough < payload fragment < broadcasters < methods < control
//! ```
//!
//! Broadcasters, methods, and the control object are typed fields rather
//! than JSON entries, so they shadow data keys by removal: a data key that
//! collides with a bound name (or the reserved `"cable"` key) is dropped
//! from the merged bag.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::binding::{Broadcaster, CableControl, RemoteMethod};

/// Reserved key for the control object in the resolved surface.
pub const CABLE_PROP: &str = "cable";

/// An ordered-merge key-value bag of JSON props.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropsBag(Map<String, Value>);

impl PropsBag {
    /// Create an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a prop, returning the previous value for the key if any.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    /// Look up a prop by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Remove a prop by key, returning it if present.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Whether the bag contains a prop for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of props in the bag.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Merge `other` into `self`; keys in `other` win on collision.
    pub fn extend_from(&mut self, other: &Self) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Ordered merge: later sources override earlier ones on key collision.
    ///
    /// Merging zero sources yields an empty bag.
    #[must_use]
    pub fn merged(sources: &[&Self]) -> Self {
        let mut out = Self::new();
        for source in sources {
            out.extend_from(source);
        }
        out
    }
}

impl From<Map<String, Value>> for PropsBag {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for PropsBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The full prop surface handed to the wrapped view on each resolution.
#[derive(Debug, Clone)]
pub struct ResolvedProps {
    /// Passthrough props with the current received-payload fragment merged
    /// on top, minus keys shadowed by bound names or the control key.
    pub props: PropsBag,
    /// Currently bound broadcasters, by name.
    pub broadcasters: BTreeMap<String, Broadcaster>,
    /// Currently bound remote methods, by name.
    pub methods: BTreeMap<String, RemoteMethod>,
    /// Control object: connected flag plus connect/disconnect entry points.
    pub cable: CableControl,
}

impl ResolvedProps {
    /// Resolve the view surface from its sources with the documented
    /// precedence.
    pub(crate) fn resolve(
        passthrough: &PropsBag,
        fragment: Option<&PropsBag>,
        broadcasters: BTreeMap<String, Broadcaster>,
        methods: BTreeMap<String, RemoteMethod>,
        cable: CableControl,
    ) -> Self {
        let mut props = match fragment {
            Some(fragment) => PropsBag::merged(&[passthrough, fragment]),
            None => passthrough.clone(),
        };

        // Bound names and the control key shadow data entries.
        for name in broadcasters.keys().chain(methods.keys()) {
            props.remove(name);
        }
        props.remove(CABLE_PROP);

        Self {
            props,
            broadcasters,
            methods,
            cable,
        }
    }
}
