#[macro_use]
extern crate diesel;

use actix_web::{middleware, web, App, HttpServer};
use diesel::{prelude::*, r2d2};
use dotenvy;
mod actions;
mod caller;
mod config;
mod error;
mod models;
mod queue;
mod routes;
mod rules;
mod schema;
mod sku;

pub type DbPool = r2d2::Pool<r2d2::ConnectionManager<PgConnection>>;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = config::AppConfig::from_env()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    // initialize DB pool outside of `HttpServer::new` so that it is shared across all workers
    let pool = initialize_db_pool(&config.database_url)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    // Bookings keep working without a broker; notifications are then recorded as failed
    let mut queue_service = queue::NotificationQueueService::new(pool.clone(), config.amqp.clone());
    match queue_service.initialize().await {
        Ok(()) => {
            let consumer_service = queue_service.clone();
            tokio::spawn(async move {
                if let Err(e) = consumer_service.start_consuming_reminders().await {
                    log::error!("Error starting reminder consumer: {:?}", e);
                }
            });
        }
        Err(e) => log::warn!("RabbitMQ unavailable, notifications will not be delivered: {:?}", e),
    }

    let bind = (config.bind_address.clone(), config.port);
    let queue_service = web::Data::new(queue_service);
    let config = web::Data::new(config);

    log::info!("starting HTTP server at http://{}:{}", bind.0, bind.1);

    let http = HttpServer::new(move || {
        App::new()
            // add DB pool handle to app data; enables use of `web::Data<DbPool>` extractor
            .app_data(web::Data::new(pool.clone()))
            .app_data(queue_service.clone())
            .app_data(config.clone())
            .wrap(middleware::Logger::default())
            .app_data(routes::json_config())
            .configure(routes::configure)
    })
    .bind(bind)?
    .run();

    http.await
}

fn initialize_db_pool(database_url: &str) -> Result<DbPool, r2d2::PoolError> {
    let manager = r2d2::ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder().build(manager)
}
