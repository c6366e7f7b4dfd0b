mod api;
mod app;
mod prices;

pub use app::add_routes;
