pub mod test_concurrency_cap;
pub mod test_delete_idempotency;
