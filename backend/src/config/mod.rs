use dotenv::dotenv;
use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        dotenv().ok(); // Load .env file if present
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            port: env::var("PORT").unwrap_or_else(|_| "8000".to_string()).parse()?,
            jwt_secret: env::var("JWT_SECRET")?,
        })
    }
}
