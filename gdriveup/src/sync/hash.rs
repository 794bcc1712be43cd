use std::io;
use std::path::Path;

use md5::Context;
use tokio::io::AsyncReadExt;

/// Streams a file through MD5 and returns the lowercase hex digest. Drive
/// reports the same digest as `md5Checksum`, so this is the identity used
/// for change detection.
pub async fn md5_of_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = Context::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        context.consume(&buf[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}
