//! Source loading from files, file URLs and HTTP

mod common;

use bgfill::{BgFillError, ImageLoader, ImageSource, Result};
use common::{encode_png, gradient_image};
use std::borrow::Cow;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serve one canned HTTP response on a local port and return its base URL
async fn serve_once(status: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = vec![0u8; 4096];
        let _ = socket.read(&mut request).await;

        let header = format!(
            "HTTP/1.1 {}\r\nContent-Type: image/png\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        socket.write_all(header.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{}", addr)
}

#[tokio::test]
async fn test_load_from_path() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("input.png");
    std::fs::write(&path, encode_png(&gradient_image(12, 7)))?;

    let bitmap = ImageLoader::new()?.load(&ImageSource::Path(path)).await?;
    assert_eq!(bitmap.dimensions(), (12, 7));
    Ok(())
}

#[tokio::test]
async fn test_load_from_file_url() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("from-url.png");
    std::fs::write(&path, encode_png(&gradient_image(5, 9)))?;

    let source = ImageSource::parse(&format!("file://{}", path.display()));
    assert!(matches!(source, ImageSource::Url(_)));

    let bitmap = ImageLoader::new()?.load(&source).await?;
    assert_eq!(bitmap.dimensions(), (5, 9));
    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_decode_failure() -> Result<()> {
    let dir = TempDir::new()?;
    let err = ImageLoader::new()?
        .load(&ImageSource::Path(dir.path().join("nope.png")))
        .await
        .unwrap_err();
    assert!(matches!(err, BgFillError::Decode(_)));
    Ok(())
}

#[tokio::test]
async fn test_load_over_http() -> Result<()> {
    let base = serve_once("200 OK", encode_png(&gradient_image(16, 4))).await;

    let bitmap = ImageLoader::with_timeout(Duration::from_secs(5))?
        .load(&ImageSource::parse(&format!("{}/image.png", base)))
        .await?;
    assert_eq!(bitmap.dimensions(), (16, 4));
    Ok(())
}

#[tokio::test]
async fn test_http_error_status_is_decode_failure() -> Result<()> {
    let base = serve_once("404 Not Found", Vec::new()).await;

    let err = ImageLoader::with_timeout(Duration::from_secs(5))?
        .load(&ImageSource::parse(&format!("{}/missing.png", base)))
        .await
        .unwrap_err();
    match err {
        BgFillError::Decode(msg) => assert!(msg.contains("404")),
        other => panic!("unexpected error: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_http_body_that_is_not_an_image() -> Result<()> {
    let base = serve_once("200 OK", b"<html>not an image</html>".to_vec()).await;

    let err = ImageLoader::with_timeout(Duration::from_secs(5))?
        .load(&ImageSource::parse(&format!("{}/page", base)))
        .await
        .unwrap_err();
    assert!(matches!(err, BgFillError::Decode(_)));
    Ok(())
}

#[tokio::test]
async fn test_bytes_source() -> Result<()> {
    let bitmap = ImageLoader::new()?
        .load(&ImageSource::Bytes(encode_png(&gradient_image(3, 3))))
        .await?;
    assert_eq!(bitmap.dimensions(), (3, 3));

    let err = ImageLoader::new()?
        .load(&ImageSource::Bytes(Vec::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, BgFillError::Decode(_)));
    Ok(())
}

#[tokio::test]
async fn test_in_memory_source_is_borrowed() -> Result<()> {
    let source = ImageSource::Bytes(encode_png(&gradient_image(4, 4)));
    let ImageSource::Bytes(original) = &source else {
        unreachable!()
    };

    let fetched = ImageLoader::new()?.fetch(&source).await?;
    match fetched {
        Cow::Borrowed(bytes) => assert_eq!(bytes.as_ptr(), original.as_ptr()),
        Cow::Owned(_) => panic!("in-memory bytes were copied"),
    }
    Ok(())
}

#[tokio::test]
async fn test_owned_bytes_decode() -> Result<()> {
    let loader = ImageLoader::new()?;
    let bitmap = loader.load_bytes(encode_png(&gradient_image(6, 2))).await?;
    assert_eq!(bitmap.dimensions(), (6, 2));

    let err = loader.load_bytes(Vec::new()).await.unwrap_err();
    assert!(matches!(err, BgFillError::Decode(_)));
    Ok(())
}
