pub mod request_metrics;

pub use request_metrics::Entity as RequestMetrics;
