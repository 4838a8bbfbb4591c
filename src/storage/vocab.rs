//! Type tag vocabularies
//!
//! Product types, sub-types and detection line types come from a small
//! fixed vocabulary, but producers are free to invent new tags. Known tags
//! map to enum variants; anything else is kept as an interned string so
//! repeated unknown tags share one allocation.
//!
//! Tags are written to the log as single whitespace-free tokens, so any
//! internal whitespace is folded to `_` when a tag is parsed.

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Placeholder written for an empty tag
const EMPTY_TAG: &str = "UNKNOWN";

fn interner() -> &'static Mutex<HashSet<Arc<str>>> {
    static TABLE: OnceLock<Mutex<HashSet<Arc<str>>>> = OnceLock::new();
    TABLE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// An interned tag outside the fixed vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn intern(text: &str) -> Self {
        let mut table = interner().lock();
        if let Some(existing) = table.get(text) {
            return Symbol(Arc::clone(existing));
        }
        let shared: Arc<str> = Arc::from(text);
        table.insert(Arc::clone(&shared));
        Symbol(shared)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    fn shares_storage_with(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Fold a raw tag into a single token
fn normalize(raw: &str) -> String {
    let token = raw.split_whitespace().collect::<Vec<_>>().join("_");
    if token.is_empty() {
        EMPTY_TAG.to_string()
    } else {
        token
    }
}

macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Tag outside the fixed vocabulary
            Other(Symbol),
        }

        impl $name {
            /// Parse a tag, accepting unknown values
            pub fn parse(raw: &str) -> Self {
                let token = normalize(raw);
                match token.to_ascii_uppercase().as_str() {
                    $($text => $name::$variant,)+
                    _ => $name::Other(Symbol::intern(&token)),
                }
            }

            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Other(symbol) => symbol.as_str(),
                }
            }

            /// Whether this tag belongs to the fixed vocabulary
            pub fn is_known(&self) -> bool {
                !matches!(self, $name::Other(_))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name::parse(s))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                Ok($name::parse(&raw))
            }
        }
    };
}

vocabulary! {
    /// Product type carried in a record header
    ProductKind {
        Boundary => "BOUNDARY",
        ColdFront => "COLD_FRONT",
        WarmFront => "WARM_FRONT",
        StationaryFront => "STATIONARY_FRONT",
        OccludedFront => "OCCLUDED_FRONT",
        Dryline => "DRYLINE",
        GustFront => "GUST_FRONT",
        SeaBreeze => "SEA_BREEZE",
        Trough => "TROUGH",
    }
}

vocabulary! {
    /// Product sub-type carried in a record header
    ProductSubKind {
        Detection => "DETECTION",
        Extrapolation => "EXTRAPOLATION",
        Forecast => "FORECAST",
        Analysis => "ANALYSIS",
        /// Hand-drawn by a forecaster
        Manual => "MANUAL",
    }
}

vocabulary! {
    /// Line type of a detection attribute line
    LineType {
        Boundary => "BOUNDARY",
        ColdFront => "COLD_FRONT",
        WarmFront => "WARM_FRONT",
        GustFront => "GUST_FRONT",
        SeaBreeze => "SEA_BREEZE",
        Dryline => "DRYLINE",
        Convergence => "CONVERGENCE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tags() {
        assert_eq!(ProductKind::parse("COLD_FRONT"), ProductKind::ColdFront);
        assert_eq!(ProductKind::parse("cold_front"), ProductKind::ColdFront);
        assert_eq!(ProductSubKind::parse("FORECAST"), ProductSubKind::Forecast);
        assert_eq!(LineType::parse("CONVERGENCE"), LineType::Convergence);
        assert!(ProductKind::GustFront.is_known());
        assert_eq!(ProductKind::GustFront.to_string(), "GUST_FRONT");
    }

    #[test]
    fn test_unknown_tags_are_kept() {
        let kind = ProductKind::parse("OUTFLOW_ARC");
        assert!(!kind.is_known());
        assert_eq!(kind.as_str(), "OUTFLOW_ARC");
    }

    #[test]
    fn test_unknown_tags_are_interned() {
        let (ProductKind::Other(a), ProductKind::Other(b)) =
            (ProductKind::parse("BORE"), ProductKind::parse("BORE"))
        else {
            panic!("expected interned tags");
        };
        assert!(a.shares_storage_with(&b));
    }

    #[test]
    fn test_whitespace_is_folded() {
        let kind = ProductKind::parse("  lake breeze ");
        assert_eq!(kind.as_str(), "lake_breeze");
        assert_eq!(ProductKind::parse("").as_str(), "UNKNOWN");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&LineType::GustFront).unwrap();
        assert_eq!(json, "\"GUST_FRONT\"");
        let back: LineType = serde_json::from_str("\"HOOK\"").unwrap();
        assert_eq!(back.as_str(), "HOOK");
    }
}
