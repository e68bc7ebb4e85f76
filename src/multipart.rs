//! `multipart/form-data` body construction for the single `file` upload
//! field a request template may carry.

use std::path::Path;

use rand::Rng;

pub struct MultipartBody {
    pub content_type: String,
    pub body: Vec<u8>,
}

pub fn build_file_upload(path: &Path) -> crate::error::Result<MultipartBody> {
    let bytes = std::fs::read(path).map_err(crate::error::Error::UploadFile)?;
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());

    let boundary = random_boundary();
    let mut body = Vec::with_capacity(bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(&bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Ok(MultipartBody {
        content_type: format!("multipart/form-data; boundary={boundary}"),
        body,
    })
}

fn random_boundary() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
    format!("mmin-boundary-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_file_contents_in_one_part() {
        let path = std::env::temp_dir().join(format!("mmin-test-upload-{}", std::process::id()));
        std::fs::write(&path, b"hello world").unwrap();
        let body = build_file_upload(&path).unwrap();
        assert!(body.content_type.starts_with("multipart/form-data; boundary="));
        assert!(body.body.windows(11).any(|w| w == b"hello world"));
        std::fs::remove_file(&path).unwrap();
    }
}
