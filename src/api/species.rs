use reqwest::Method;

use crate::client::{ApiClient, RequestDescriptor};
use crate::error::ApiError;
use crate::models::Species;

impl ApiClient {
    pub async fn species(&self) -> Result<Vec<Species>, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint(&["species"])?);
        self.call(request).await
    }

    pub async fn create_species(&self, species: &Species) -> Result<serde_json::Value, ApiError> {
        let request =
            RequestDescriptor::new(Method::POST, self.endpoint(&["species"])?).body(species)?;
        self.call(request).await
    }

    pub async fn update_species(
        &self,
        id: i64,
        species: &Species,
    ) -> Result<serde_json::Value, ApiError> {
        let request = RequestDescriptor::new(
            Method::PUT,
            self.endpoint(&["species", &id.to_string()])?,
        )
        .body(species)?;
        self.call(request).await
    }

    pub async fn delete_species(&self, id: i64) -> Result<serde_json::Value, ApiError> {
        let request = RequestDescriptor::new(
            Method::DELETE,
            self.endpoint(&["species", &id.to_string()])?,
        );
        self.call(request).await
    }
}
