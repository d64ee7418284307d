use reqwest::Method;

use crate::client::{ApiClient, RequestDescriptor};
use crate::error::ApiError;
use crate::models::{Page, Parrot};

impl ApiClient {
    /// GET /parrots?pageNum=&pageSize=
    pub async fn parrots(&self, page: u32, page_size: u32) -> Result<Page<Parrot>, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint(&["parrots"])?).query(&[
            ("pageNum", &page.to_string()),
            ("pageSize", &page_size.to_string()),
        ]);
        self.call(request).await
    }

    /// GET /parrots?all=true (без пагинации, ответ всё равно в конверте Page)
    pub async fn all_parrots(&self) -> Result<Vec<Parrot>, ApiError> {
        let request = RequestDescriptor::new(Method::GET, self.endpoint(&["parrots"])?)
            .query(&[("all", "true")]);
        let page: Page<Parrot> = self.call(request).await?;
        Ok(page.records)
    }

    pub async fn add_parrot(&self, parrot: &Parrot) -> Result<serde_json::Value, ApiError> {
        let request =
            RequestDescriptor::new(Method::POST, self.endpoint(&["parrots"])?).body(parrot)?;
        self.call(request).await
    }

    pub async fn update_parrot(
        &self,
        id: i64,
        parrot: &Parrot,
    ) -> Result<serde_json::Value, ApiError> {
        let request = RequestDescriptor::new(
            Method::PUT,
            self.endpoint(&["parrots", &id.to_string()])?,
        )
        .body(parrot)?;
        self.call(request).await
    }

    pub async fn delete_parrot(&self, id: i64) -> Result<serde_json::Value, ApiError> {
        let request = RequestDescriptor::new(
            Method::DELETE,
            self.endpoint(&["parrots", &id.to_string()])?,
        );
        self.call(request).await
    }

    /// GET /parrots/by-cage/{cageId}
    pub async fn parrots_by_cage(&self, cage_id: i64) -> Result<Vec<Parrot>, ApiError> {
        let request = RequestDescriptor::new(
            Method::GET,
            self.endpoint(&["parrots", "by-cage", &cage_id.to_string()])?,
        );
        self.call(request).await
    }

    /// GET /parrots/search/like?ring= (поиск по части номера кольца)
    pub async fn search_parrots_by_ring(&self, ring: &str) -> Result<Vec<Parrot>, ApiError> {
        let request =
            RequestDescriptor::new(Method::GET, self.endpoint(&["parrots", "search", "like"])?)
                .query(&[("ring", ring)]);
        self.call(request).await
    }
}
