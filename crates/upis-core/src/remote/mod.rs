mod client;
mod digest;
mod directory;
mod http;

pub use {
    client::{BlockProposal, RemoteSync, UploadTarget},
    digest::{DIGEST_HEADER, block_digest},
    directory::{Directory, Identity},
    http::{HttpDirectory, HttpRemote},
};
