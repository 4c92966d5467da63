pub mod constants;
pub mod dataset;
pub mod doppler_errors;
pub mod map;
pub mod mem;
pub mod memit;
pub mod projection;
pub mod storage;
pub mod synthetic;
