pub mod assembler;
pub mod assets;
pub mod controller;
pub mod loop_worker;
pub mod model;
pub mod snapshots;
pub mod store;
pub mod writes;

pub use assembler::{ActivityContext, Assembler, AssemblerConfig, CaptureReport, FocusChange};
pub use assets::AssetData;
pub use controller::AssemblerController;
pub use model::{Activity, ActivityAsset, ActivitySnapshot, Frame};
pub use snapshots::{CapturedSnapshot, SnapshotData};
pub use store::ActivityStore;
