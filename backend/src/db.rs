use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::error;

use crate::error::ApiError;

pub fn establish_connection(database_url: &str) -> Result<PgConnection, ApiError> {
    PgConnection::establish(database_url).map_err(|e| {
        error!("failed to establish database connection: {e}");
        ApiError::from(e)
    })
}
