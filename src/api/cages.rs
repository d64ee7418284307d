use reqwest::Method;

use crate::client::{ApiClient, RequestDescriptor};
use crate::error::ApiError;
use crate::models::{Cage, Page, Species};

/// Подпись для клетки без известного вида
pub const UNKNOWN_SPECIES: &str = "未知";

impl ApiClient {
    /// GET /cages/with-parrot-count?pageNum=&pageSize=
    pub async fn cages(&self, page: u32, page_size: u32) -> Result<Page<Cage>, ApiError> {
        let request = RequestDescriptor::new(
            Method::GET,
            self.endpoint(&["cages", "with-parrot-count"])?,
        )
        .query(&[
            ("pageNum", &page.to_string()),
            ("pageSize", &page_size.to_string()),
        ]);
        self.call(request).await
    }

    /// GET /cages/all
    pub async fn all_cages(&self) -> Result<Vec<Cage>, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint(&["cages", "all"])?);
        self.call(request).await
    }

    pub async fn cage(&self, id: i64) -> Result<Cage, ApiError> {
        let request =
            RequestDescriptor::new(Method::GET, self.endpoint(&["cages", &id.to_string()])?);
        self.call(request).await
    }

    /// GET /cages/by-location/{location}; location is the species id
    pub async fn cages_by_location(&self, location: &str) -> Result<Vec<Cage>, ApiError> {
        let request = RequestDescriptor::new(
            Method::GET,
            self.endpoint(&["cages", "by-location", location])?,
        );
        self.call(request).await
    }

    /// Клетки всех выбранных видов, в порядке выбора.
    /// Запросы идут параллельно; первая ошибка прерывает результат.
    pub async fn cages_by_species(&self, species_ids: &[i64]) -> Result<Vec<Cage>, ApiError> {
        let locations: Vec<String> = species_ids.iter().map(|id| id.to_string()).collect();
        let lists = futures::future::try_join_all(
            locations.iter().map(|location| self.cages_by_location(location)),
        )
        .await?;
        Ok(lists.into_iter().flatten().collect())
    }

    /// GET /cages/list-with-parrot-count
    pub async fn cages_with_parrot_count(&self) -> Result<Vec<Cage>, ApiError> {
        let request = RequestDescriptor::new(
            Method::GET,
            self.endpoint(&["cages", "list-with-parrot-count"])?,
        );
        self.call(request).await
    }

    /// GET /cages/search?keyword=
    pub async fn search_cages(&self, keyword: &str) -> Result<Vec<Cage>, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint(&["cages", "search"])?)
            .query(&[("keyword", keyword)]);
        self.call(request).await
    }

    /// GET /cages/search-with-parrot-count?keyword=
    pub async fn search_cages_with_parrot_count(
        &self,
        keyword: &str,
    ) -> Result<Vec<Cage>, ApiError> {
        let request = RequestDescriptor::new(
            Method::GET,
            self.endpoint(&["cages", "search-with-parrot-count"])?,
        )
        .query(&[("keyword", keyword)]);
        self.call(request).await
    }

    pub async fn add_cage(&self, cage: &Cage) -> Result<serde_json::Value, ApiError> {
        let request = RequestDescriptor::new(Method::POST, self.endpoint(&["cages"])?).body(cage)?;
        self.call(request).await
    }

    pub async fn delete_cage(&self, id: i64) -> Result<serde_json::Value, ApiError> {
        let request =
            RequestDescriptor::new(Method::DELETE, self.endpoint(&["cages", &id.to_string()])?);
        self.call(request).await
    }
}

/// Клетки, закреплённые за видом
pub fn cages_for_species(cages: &[Cage], species_id: i64) -> Vec<Cage> {
    cages
        .iter()
        .filter(|cage| cage.species_id() == Some(species_id))
        .cloned()
        .collect()
}

/// "<вид>-<код клетки>"
pub fn cage_label(cage: &Cage, species: &[Species]) -> String {
    let species_name = cage
        .species_id()
        .and_then(|id| species.iter().find(|s| s.id == Some(id)))
        .map(|s| s.name.as_str())
        .unwrap_or(UNKNOWN_SPECIES);
    format!("{}-{}", species_name, cage.cage_code)
}

/// Case-insensitive substring match on the cage code
pub fn filter_cages_by_code(cages: &[Cage], text: &str) -> Vec<Cage> {
    let needle = text.to_lowercase();
    cages
        .iter()
        .filter(|cage| cage.cage_code.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}
