//! Option strings for formats and filters.
//!
//! An option string is a comma-separated list of items:
//!
//! | Item | Meaning |
//! |------|---------|
//! | `key=value` | set `key` on every module that knows it |
//! | `key` | same as `key=1` |
//! | `!key` | clear `key` |
//! | `module:item` | only offer the item to `module` |

use crate::error::{Error, Result};

/// One parsed option item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OptionItem<'a> {
    pub(crate) module: Option<&'a str>,
    pub(crate) key: &'a str,
    pub(crate) value: Option<&'a str>,
}

impl<'a> OptionItem<'a> {
    fn parse(item: &'a str) -> Option<Self> {
        let item = item.trim();
        let (module, rest) = match item.split_once(':') {
            Some((module, rest)) => (Some(module).filter(|m| !m.is_empty()), rest),
            None => (None, item),
        };
        let (key, value) = match rest.strip_prefix('!') {
            Some(key) => (key, None),
            None => match rest.split_once('=') {
                Some((key, value)) => (key, Some(value)),
                None => (rest, Some("1")),
            },
        };
        (!key.is_empty()).then_some(Self { module, key, value })
    }
}

/// Splits an option string into items, dropping empty ones.
pub(crate) fn parse(options: &str) -> impl Iterator<Item = OptionItem<'_>> {
    options.split(',').filter_map(OptionItem::parse)
}

/// Offers every item of `options` to `apply`.
///
/// `apply` returns whether some module accepted the item; the first item no
/// module accepts fails with [`Error::UnknownOption`].
pub(crate) fn apply_all(
    options: &str,
    mut apply: impl FnMut(Option<&str>, &str, Option<&str>) -> Result<bool>,
) -> Result<()> {
    for item in parse(options) {
        log::trace!("applying option {:?}", item);
        if !apply(item.module, item.key, item.value)? {
            return Err(Error::UnknownOption {
                module: item.module.map(str::to_string),
                option: item.key.to_string(),
            });
        }
    }
    Ok(())
}

/// Returns true if an item addressed to `module` should reach a module called `name`.
pub(crate) fn addressed_to(module: Option<&str>, name: &str) -> bool {
    module.is_none_or(|m| m == name)
}
