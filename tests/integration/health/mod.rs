pub mod test_health_and_metrics;
