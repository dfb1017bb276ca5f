pub mod phash;
pub mod process;

pub use process::{detect_browser, BrowserProcess};
