use lxdform_client::simplestreams::SimpleStreamsServer;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn index_server() -> MockServer {
    let mock = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/streams/v1/images.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "format": "products:1.0",
            "products": {
                "ubuntu:jammy:amd64:default": {
                    "aliases": "22.04,jammy,ubuntu/22.04",
                    "arch": "amd64",
                    "versions": {
                        "20240101": {"items": {"lxd.tar.xz": {
                            "ftype": "lxd.tar.xz", "combined_squashfs_sha256": "old"
                        }}},
                        "20240301": {"items": {"lxd.tar.xz": {
                            "ftype": "lxd.tar.xz", "combined_squashfs_sha256": "new"
                        }}}
                    }
                },
                "ubuntu:jammy:arm64:default": {
                    "aliases": "22.04,jammy",
                    "arch": "arm64",
                    "versions": {
                        "20240301": {"items": {"lxd.tar.xz": {
                            "ftype": "lxd.tar.xz", "combined_squashfs_sha256": "arm"
                        }}}
                    }
                }
            }
        })))
        .mount(&mock)
        .await;
    mock
}

#[tokio::test]
async fn test_alias_resolves_to_latest_version() {
    let mock = index_server().await;
    let server = SimpleStreamsServer::new(mock.uri())
        .unwrap()
        .with_architecture("amd64");

    let (alias, etag) = server.get_image_alias("jammy").await.unwrap();
    assert_eq!(alias.target, "new");
    assert!(etag.is_empty());

    let server = server.with_architecture("arm64");
    let (alias, _) = server.get_image_alias("22.04").await.unwrap();
    assert_eq!(alias.target, "arm");
}

#[tokio::test]
async fn test_unknown_alias_is_not_found() {
    let mock = index_server().await;
    let server = SimpleStreamsServer::new(mock.uri())
        .unwrap()
        .with_architecture("amd64");

    let err = server.get_image_alias("focal").await.unwrap_err();
    assert!(err.is_not_found());
}
