//! Folder/file tree variant for document libraries: browse the folder
//! listing breadth-first into a [`Folder`] tree, save it, then download
//! the tree depth-first.

mod browse;
mod download;
mod landing;
mod model;

pub use browse::{browse, list_entries, Entry};
pub use download::{download, file_name, DownloadOptions};
pub use landing::{move_into_place, wait_for_file};
pub use model::{FileEntry, Folder};
