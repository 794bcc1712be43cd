mod client;

pub use client::{
    ApiErrorClass, DriveClient, DriveEntry, DriveError, FOLDER_MIME_TYPE,
};
