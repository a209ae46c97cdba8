//! FAIR timing selectors.
//!
//! A selector names a subset of the accelerator timing cycles:
//!
//! ```text
//! FAIR.SELECTOR.C=2:S=1:P=3:T=4   chain, sequence, process, timing group
//! FAIR.SELECTOR.C=2               everything in chain 2
//! FAIR.SELECTOR.ALL               every cycle
//! ```
//!
//! A component that is absent (or `-1`) matches every value. A selector with
//! all four components set is a *context*: one concrete cycle.

use std::fmt;
use std::str::FromStr;

use crate::error::CmwLightError;

pub const SELECTOR_PREFIX: &str = "FAIR.SELECTOR.";
pub const SELECTOR_ALL: &str = "ALL";
const SEPARATOR: char = ':';

/// Wildcard component value.
pub const ANY: i32 = -1;

/// Parsed FAIR selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FairSelector {
    chain: i32,
    sequence: i32,
    process: i32,
    timing_group: i32,
}

impl Default for FairSelector {
    /// The selector matching everything.
    fn default() -> Self {
        Self::all()
    }
}

impl FairSelector {
    pub fn all() -> Self {
        Self {
            chain: ANY,
            sequence: ANY,
            process: ANY,
            timing_group: ANY,
        }
    }

    /// Build a selector from components; `-1` is a wildcard.
    pub fn new(chain: i32, sequence: i32, process: i32, timing_group: i32) -> Self {
        Self {
            chain,
            sequence,
            process,
            timing_group,
        }
    }

    pub fn chain(&self) -> i32 {
        self.chain
    }

    pub fn sequence(&self) -> i32 {
        self.sequence
    }

    pub fn process(&self) -> i32 {
        self.process
    }

    pub fn timing_group(&self) -> i32 {
        self.timing_group
    }

    /// `true` if no component is a wildcard.
    pub fn is_context(&self) -> bool {
        self.components().iter().all(|&(_, value)| value != ANY)
    }

    /// Whether this selector matches the concrete cycle `context`.
    ///
    /// # Errors
    ///
    /// `Selector` if `context` has wildcard components.
    pub fn matches(&self, context: &FairSelector) -> Result<bool, CmwLightError> {
        if !context.is_context() {
            return Err(CmwLightError::Selector {
                selector: context.to_string(),
                reason: "can only match against a context".to_string(),
            });
        }
        Ok(context.is_included_in(self))
    }

    /// Whether every cycle this selector matches is also matched by `other`.
    pub fn is_included_in(&self, other: &FairSelector) -> bool {
        self.components()
            .iter()
            .zip(other.components().iter())
            .all(|(&(_, mine), &(_, theirs))| theirs == ANY || mine == theirs)
    }

    /// Components in display order.
    fn components(&self) -> [(char, i32); 4] {
        [
            ('S', self.sequence),
            ('C', self.chain),
            ('P', self.process),
            ('T', self.timing_group),
        ]
    }
}

impl fmt::Display for FairSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(SELECTOR_PREFIX)?;
        let mut written = 0;
        for (name, value) in self.components() {
            if value == ANY {
                continue;
            }
            if written > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{name}={value}")?;
            written += 1;
        }
        if written == 0 {
            f.write_str(SELECTOR_ALL)?;
        }
        Ok(())
    }
}

impl FromStr for FairSelector {
    type Err = CmwLightError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| CmwLightError::Selector {
            selector: s.to_string(),
            reason,
        };

        let body = s
            .strip_prefix(SELECTOR_PREFIX)
            .ok_or_else(|| invalid(format!("missing '{SELECTOR_PREFIX}' prefix")))?;
        let mut selector = Self::all();
        if body == SELECTOR_ALL {
            return Ok(selector);
        }

        for component in body.split(SEPARATOR) {
            let (name, value) = component
                .split_once('=')
                .ok_or_else(|| invalid(format!("component '{component}' is not NAME=VALUE")))?;
            let value: i32 = value
                .parse()
                .map_err(|_| invalid(format!("'{value}' is not an integer")))?;
            if value < ANY {
                return Err(invalid(format!("{name} cannot be negative")));
            }
            match name {
                "C" => selector.chain = value,
                "S" => selector.sequence = value,
                "P" => selector.process = value,
                "T" => selector.timing_group = value,
                other => return Err(invalid(format!("unsupported component '{other}'"))),
            }
        }
        Ok(selector)
    }
}
