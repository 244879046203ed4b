use std::{
    net::{SocketAddr, TcpListener},
    process::{Child, Command, Stdio},
    time::Duration,
};

use anyhow::{Result, bail};
use serde_json::{Value, json};

/// kills the server on drop so a failed assert doesn't leak the process
struct ItemdProcess {
    child: Child,
    addr: SocketAddr,
}

impl ItemdProcess {
    fn start() -> Result<Self> {
        let addr = TcpListener::bind("127.0.0.1:0")?.local_addr()?;
        let child = Command::new(env!("CARGO_BIN_EXE_itemd"))
            .arg(format!("--addr={addr}"))
            .arg("--threads=2")
            .env("ITEMD_LOG", "debug")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child, addr })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn wait_healthy(&self) -> Result<()> {
        for _ in 0..100 {
            if let Ok(resp) = reqwest::get(self.url("/health")).await
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        bail!("itemd never became healthy on {}", self.addr)
    }
}

impl Drop for ItemdProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[tokio::test]
/// boots the real binary, waits for the health gate to open,
/// then runs create -> get -> partial update -> delete -> get
async fn test_basic_crud() -> Result<()> {
    let srv = ItemdProcess::start()?;
    srv.wait_healthy().await?;
    let client = reqwest::Client::new();

    let created: Value = client
        .post(srv.url("/items"))
        .json(&json!({"name": "A", "description": "d"}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let id = created["id"].as_str().expect("id is a string").to_owned();

    let health: Value = reqwest::get(srv.url("/health")).await?.json().await?;
    assert_eq!(health["item_count"], 1);

    let updated: Value = client
        .put(srv.url(&format!("/items/{id}")))
        .json(&json!({"name": "", "description": "d2"}))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(updated["name"], "A");
    assert_eq!(updated["description"], "d2");

    client
        .delete(srv.url(&format!("/items/{id}")))
        .send()
        .await?
        .error_for_status()?;
    let resp = reqwest::get(srv.url(&format!("/items/{id}"))).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    // pedantic drop
    drop(srv);
    Ok(())
}
