//! Сводная статистика вольера: клетки, пол птиц, разбивка по видам.

use serde::Serialize;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::models::{Cage, Parrot, Species};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CageStats {
    pub total: usize,
    pub used: usize,
    pub empty: usize,
    /// Percent of cages holding at least one parrot, one decimal
    pub utilization_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParrotStats {
    pub total: usize,
    pub male: usize,
    pub female: usize,
    pub unknown_gender: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesStats {
    pub species_id: Option<i64>,
    pub species_name: String,
    pub total: usize,
    pub male: usize,
    pub female: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AviaryStatistics {
    pub cage_stats: CageStats,
    pub parrot_stats: ParrotStats,
    pub species_stats: Vec<SpeciesStats>,
}

/// Посчитать статистику по уже загруженным спискам
pub fn compute(cages: &[Cage], parrots: &[Parrot], species: &[Species]) -> AviaryStatistics {
    let used = cages
        .iter()
        .filter(|cage| cage.parrot_count.unwrap_or(0) > 0)
        .count();
    let utilization_rate = if cages.is_empty() {
        0.0
    } else {
        (used as f64 / cages.len() as f64 * 1000.0).round() / 10.0
    };

    let male = parrots.iter().filter(|p| p.is_male()).count();
    let female = parrots.iter().filter(|p| p.is_female()).count();

    let species_stats = species
        .iter()
        .map(|s| {
            let of_species: Vec<&Parrot> = parrots
                .iter()
                .filter(|p| s.id.is_some() && p.species == s.id)
                .collect();
            SpeciesStats {
                species_id: s.id,
                species_name: s.name.clone(),
                total: of_species.len(),
                male: of_species.iter().filter(|p| p.is_male()).count(),
                female: of_species.iter().filter(|p| p.is_female()).count(),
            }
        })
        .collect();

    AviaryStatistics {
        cage_stats: CageStats {
            total: cages.len(),
            used,
            empty: cages.len() - used,
            utilization_rate,
        },
        parrot_stats: ParrotStats {
            total: parrots.len(),
            male,
            female,
            unknown_gender: parrots.len() - male - female,
        },
        species_stats,
    }
}

impl ApiClient {
    /// Load cages, parrots and species concurrently and compute the statistics
    pub async fn statistics(&self) -> Result<AviaryStatistics, ApiError> {
        let (cages, parrots, species) = tokio::try_join!(
            self.cages_with_parrot_count(),
            self.all_parrots(),
            self.species()
        )?;
        debug!(
            "[API] Statistics over {} cages, {} parrots, {} species",
            cages.len(),
            parrots.len(),
            species.len()
        );
        Ok(compute(&cages, &parrots, &species))
    }
}
