use crate::db::table_name;
use crate::lifecycle::BookingLifecycle;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub db_schema: Option<String>,
    pub env_name: String,
    pub lifecycle: Arc<BookingLifecycle>,
}

impl AppState {
    pub fn table(&self, name: &str) -> String {
        table_name(&self.db_schema, name)
    }
}
