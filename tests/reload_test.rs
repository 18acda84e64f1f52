//! 파일 프로바이더 → 어그리게이터 파이프라인 통합 테스트입니다.

use std::io::Write;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use rproxy::aggregator::Aggregator;
use rproxy::provider::{FileProvider, Provider, TaskPool};
use rproxy::settings::FileProviderSettings;

fn write_dynamic_config(file: &mut std::fs::File, url: &str) {
    use std::io::Seek;
    file.set_len(0).unwrap();
    file.rewind().unwrap();
    write!(
        file,
        r#"
        [backends.b1.servers.s1]
        url = "{}"

        [frontends.f1]
        backend = "b1"
        [frontends.f1.routes.main]
        rule = "Host:a.test"
        "#,
        url
    )
    .unwrap();
    file.flush().unwrap();
}

#[tokio::test]
async fn test_file_change_flows_to_merged_configuration() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    write_dynamic_config(tmp.as_file_mut(), "http://10.0.0.1:80");

    let settings = FileProviderSettings {
        path: tmp.path().to_string_lossy().to_string(),
        watch: true,
        poll_interval_secs: 1,
        constraints: vec![],
    };

    let pool = TaskPool::new();
    let (msg_tx, msg_rx) = mpsc::channel(16);
    let (cfg_tx, mut cfg_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let provider = FileProvider::new(&settings);
    provider.provide(msg_tx, &pool, &[]).await.unwrap();

    tokio::spawn(Aggregator::new(msg_rx, Duration::from_millis(100)).run(cfg_tx, shutdown_rx));

    // 초기 스냅샷이 병합 설정으로 도착한다
    let first = tokio::time::timeout(Duration::from_secs(3), cfg_rx.recv())
        .await
        .expect("초기 설정 도착 시간 초과")
        .unwrap();
    assert_eq!(first.backends["b1"].servers["s1"].url, "http://10.0.0.1:80");

    // mtime 해상도를 넘겨서 파일을 변경한다
    tokio::time::sleep(Duration::from_millis(1100)).await;
    write_dynamic_config(tmp.as_file_mut(), "http://10.0.0.2:80");

    let second = tokio::time::timeout(Duration::from_secs(5), cfg_rx.recv())
        .await
        .expect("변경 반영 시간 초과")
        .unwrap();
    assert_eq!(second.backends["b1"].servers["s1"].url, "http://10.0.0.2:80");

    pool.stop(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_identical_snapshot_triggers_no_rebuild() {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    write_dynamic_config(tmp.as_file_mut(), "http://10.0.0.1:80");

    let settings = FileProviderSettings {
        path: tmp.path().to_string_lossy().to_string(),
        watch: true,
        poll_interval_secs: 1,
        constraints: vec![],
    };

    let pool = TaskPool::new();
    let (msg_tx, msg_rx) = mpsc::channel(16);
    let (cfg_tx, mut cfg_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let provider = FileProvider::new(&settings);
    provider.provide(msg_tx, &pool, &[]).await.unwrap();

    tokio::spawn(Aggregator::new(msg_rx, Duration::from_millis(100)).run(cfg_tx, shutdown_rx));

    let _ = tokio::time::timeout(Duration::from_secs(3), cfg_rx.recv())
        .await
        .expect("초기 설정 도착 시간 초과")
        .unwrap();

    // 내용이 같은 재작성: 스냅샷은 재전송되지만 병합 결과가 같으므로
    // 재빌드는 일어나지 않아야 한다
    tokio::time::sleep(Duration::from_millis(1100)).await;
    write_dynamic_config(tmp.as_file_mut(), "http://10.0.0.1:80");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(cfg_rx.try_recv().is_err());

    pool.stop(Duration::from_secs(1)).await;
}
