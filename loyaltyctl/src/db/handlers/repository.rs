use crate::db::errors::Result;

/// Common CRUD surface implemented by the entity repositories. Each repository borrows a
/// connection (or an open transaction) for its lifetime.
#[async_trait::async_trait]
pub trait Repository {
    type CreateRequest: Send + Sync;
    type UpdateRequest: Send + Sync;
    type Response: Send;
    type Id: Send + Sync + Copy + Eq + std::hash::Hash;
    type Filter: Send + Sync;

    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response>;

    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>>;

    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response>;

    /// Returns whether a row was removed
    async fn delete(&mut self, id: Self::Id) -> Result<bool>;

    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>>;
}
