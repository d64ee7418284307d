//! Resource endpoints of the aviary backend on top of [`ApiClient`](crate::ApiClient).

mod cages;
mod parrots;
mod species;

pub use cages::{cage_label, cages_for_species, filter_cages_by_code, UNKNOWN_SPECIES};

/// Размер страницы по умолчанию для постраничных списков
pub const DEFAULT_PAGE_SIZE: u32 = 50;
