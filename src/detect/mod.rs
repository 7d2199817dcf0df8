mod adapter;
mod backend;
pub mod backends;
mod classes;
pub mod postprocess;
mod result;

pub use adapter::VehicleDetector;
pub use backend::DetectorBackend;
pub use backends::{load_backend, BackendSettings, StubBackend, StubDetection};
pub use classes::{class_name, ClassAllowList, COCO_CLASS_NAMES, VEHICLE_CLASSES};
pub use result::{BoundingBox, Detection};
