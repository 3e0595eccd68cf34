mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod services;
mod utils;

use std::io;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::{error, info};

use crate::config::Settings;

fn startup_error(context: &str, err: impl std::fmt::Display) -> io::Error {
    error!("{}: {}", context, err);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, err))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let settings = Settings::from_env().map_err(|err| startup_error("Invalid configuration", err))?;

    let pool = db::create_pool(&settings)
        .await
        .map_err(|err| startup_error("Failed to initialise the database", err))?;
    db::seed::seed_defaults(&pool, &settings)
        .await
        .map_err(|err| startup_error("Failed to seed defaults", err))?;

    let bind_address = settings.bind_address.clone();
    info!("Starting server at {}", bind_address);

    let pool = web::Data::new(pool);
    let settings = web::Data::new(settings);

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(pool.clone())
            .app_data(settings.clone())
            .configure(handlers::configure)
    })
    .bind(bind_address)?
    .run()
    .await
}
