//! Dispatch configuration.
//!
//! Defaults reproduce the constants the packed-convolution layers were tuned
//! with. Any field can be overridden from the environment:
//!
//! | Variable | Field |
//! |---|---|
//! | `LAYER_KERNELS_LOCAL_SIZE` | [`DispatchConfig::local_size`] |
//! | `LAYER_KERNELS_PACKING_NUM` | [`DispatchConfig::packing_num`] |
//! | `LAYER_KERNELS_PACKING` | [`DispatchConfig::use_packing_scheme`] (`0` or `1`) |
//! | `LAYER_KERNELS_CONV_TILE` | [`DispatchConfig::conv_tile`] |

use crate::error::{DispatchError, Result};
use crate::work::DEFAULT_LOCAL_SIZE;
use briny::prelude::{Validate, ValidationError};
use core::str::FromStr;

/// Largest local size the config accepts.
pub const MAX_LOCAL_SIZE: usize = 1024;

/// Images packed together by the packed-convolution transform.
pub const DEFAULT_PACKING_NUM: usize = 16;

/// Edge of the direct-convolution work-group tile.
pub const DEFAULT_CONV_TILE: usize = 8;

/// Tunables shared by every dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Local size of one-dimensional launches.
    pub local_size: usize,
    /// Images per pack in the packed-convolution scheme.
    pub packing_num: usize,
    /// Whether convolution layers should use the packing scheme.
    pub use_packing_scheme: bool,
    /// Work-group edge of the direct-convolution tiling.
    pub conv_tile: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            local_size: DEFAULT_LOCAL_SIZE,
            packing_num: DEFAULT_PACKING_NUM,
            use_packing_scheme: true,
            conv_tile: DEFAULT_CONV_TILE,
        }
    }
}

impl Validate for DispatchConfig {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.local_size == 0 || self.local_size > MAX_LOCAL_SIZE {
            return Err(ValidationError);
        }
        if self.packing_num == 0 {
            return Err(ValidationError);
        }
        if self.conv_tile == 0 || self.conv_tile * self.conv_tile > MAX_LOCAL_SIZE {
            return Err(ValidationError);
        }
        Ok(())
    }
}

impl DispatchConfig {
    /// Defaults overridden by whatever `LAYER_KERNELS_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DispatchConfig::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup("LAYER_KERNELS_LOCAL_SIZE") {
            config.local_size = parse("LAYER_KERNELS_LOCAL_SIZE", &value)?;
        }
        if let Some(value) = lookup("LAYER_KERNELS_PACKING_NUM") {
            config.packing_num = parse("LAYER_KERNELS_PACKING_NUM", &value)?;
        }
        if let Some(value) = lookup("LAYER_KERNELS_PACKING") {
            config.use_packing_scheme = parse::<u8>("LAYER_KERNELS_PACKING", &value)? != 0;
        }
        if let Some(value) = lookup("LAYER_KERNELS_CONV_TILE") {
            config.conv_tile = parse("LAYER_KERNELS_CONV_TILE", &value)?;
        }
        config.checked()
    }

    /// Returns the config if it passes validation.
    pub fn checked(self) -> Result<Self> {
        self.validate()
            .map_err(|err| DispatchError::InvalidConfig(format!("{self:?}: {err}")))?;
        Ok(self)
    }
}

fn parse<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DispatchError::InvalidConfig(format!("{key}={value:?} is not a number")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_match_packing_constants() {
        let config = DispatchConfig::default();
        assert_eq!(config.local_size, 256);
        assert_eq!(config.packing_num, 16);
        assert!(config.use_packing_scheme);
        assert!(config.checked().is_ok());
    }

    #[test]
    fn overrides_are_applied() {
        let config = DispatchConfig::from_lookup(env(&[
            ("LAYER_KERNELS_LOCAL_SIZE", "128"),
            ("LAYER_KERNELS_PACKING", "0"),
        ]))
        .unwrap();
        assert_eq!(config.local_size, 128);
        assert!(!config.use_packing_scheme);
        assert_eq!(config.packing_num, 16);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = DispatchConfig::from_lookup(env(&[("LAYER_KERNELS_LOCAL_SIZE", "4096")]));
        assert!(matches!(err, Err(DispatchError::InvalidConfig(_))));
        let err = DispatchConfig::from_lookup(env(&[("LAYER_KERNELS_PACKING_NUM", "many")]));
        assert!(matches!(err, Err(DispatchError::InvalidConfig(_))));
    }
}
