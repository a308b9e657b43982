#![deny(clippy::unwrap_used)]

use serde::de::IntoDeserializer;
use serde::Deserialize;

pub mod access;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod control;
pub mod import;
pub mod merge;
pub mod pagination;
pub mod recovery;

#[cfg(test)]
pub(crate) mod testing;

pub use catalog_api;

pub fn empty_string_as_none<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: serde::Deserialize<'de>,
{
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => T::deserialize(s.into_deserializer()).map(Some),
    }
}

pub fn empty_string_as_none_parse<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Display,
{
    let opt = Option::<String>::deserialize(de)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse()
            .map_err(|err| serde::de::Error::custom(format!("{s}: {err}")))
            .map(Some),
    }
}

/// Formats a byte count the way the import listing shows it.
pub fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024. * 1024.))
    }
}
