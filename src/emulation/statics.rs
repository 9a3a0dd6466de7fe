//! Static field storage.

use dashmap::{DashMap, DashSet};

use crate::{
    emulation::EmValue,
    metadata::{members::Field, token::Token},
};

/// Storage of every static field touched by a [`crate::emulation::Runtime`]
#[derive(Default)]
pub struct StaticFields {
    values: DashMap<Token, EmValue>,
    initialized: DashSet<Token>,
}

impl StaticFields {
    /// Creates empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `field`, its default if never stored
    #[must_use]
    pub fn get(&self, field: &Field) -> EmValue {
        self.values
            .get(&field.token)
            .map_or_else(|| EmValue::default_for(&field.field_type), |value| value.clone())
    }

    /// Stores `field`
    pub fn set(&self, field: &Field, value: EmValue) {
        self.values.insert(field.token, value);
    }

    /// Marks the type initializer of `ty` as started; returns `false` if it already was
    pub fn begin_initialization(&self, ty: Token) -> bool {
        self.initialized.insert(ty)
    }

    /// Number of stored static fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no static field was stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
