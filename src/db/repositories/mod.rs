pub mod cameras;

pub use cameras::CamerasRepository;
