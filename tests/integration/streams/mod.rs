pub mod test_crud;
pub mod test_mjpeg_availability;
pub mod test_reorder;
