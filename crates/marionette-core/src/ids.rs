use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

macro_rules! generated_id {
    ($name:ident, $prefix:expr) => {
        branded_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

// Assigned by the transport when a client connects.
generated_id!(SessionId, "sess");

// Supplied by callers; resolved to an address by the link layer.
branded_id!(InstanceId);

impl InstanceId {
    /// Numeric value of the id, if it is a plain decimal integer.
    pub fn index(&self) -> Option<u32> {
        let raw = self.0.trim();
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        raw.parse().ok()
    }

    /// Canonical form: trimmed, and numeric ids without leading zeros, so
    /// `"01"` and `"1"` name the same instance.
    pub fn normalized(&self) -> Self {
        match self.index() {
            Some(n) => Self::from(n),
            None => Self(self.0.trim().to_string()),
        }
    }
}

impl From<u32> for InstanceId {
    fn from(n: u32) -> Self {
        Self(n.to_string())
    }
}
