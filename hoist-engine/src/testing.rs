//! Scripted remote host for tests

use async_trait::async_trait;
use hoist_remote::{Dialer, RemoteChannel, RemoteError, StaticStore};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

type Handler = Arc<dyn Fn(&str) -> Result<String, RemoteError> + Send + Sync>;

/// A fake host: every command is answered by `handler` and recorded
#[derive(Clone)]
pub struct MockHost {
    handler: Handler,
    commands: Arc<Mutex<Vec<String>>>,
    dials: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicUsize>,
    dial_error: Option<String>,
}

impl MockHost {
    pub fn new(handler: impl Fn(&str) -> Result<String, RemoteError> + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            commands: Arc::default(),
            dials: Arc::default(),
            closed: Arc::default(),
            dial_error: None,
        }
    }

    /// A host that refuses connections
    pub fn unreachable(message: &str) -> Self {
        let mut host = Self::new(|_| Ok(String::new()));
        host.dial_error = Some(message.to_string());
        host
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn dials(&self) -> Vec<String> {
        self.dials.lock().unwrap().clone()
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn answer(&self, command: &str) -> Result<String, RemoteError> {
        self.commands.lock().unwrap().push(command.to_string());
        (self.handler)(command)
    }
}

#[async_trait]
impl Dialer for MockHost {
    async fn dial(&self, address: &str, cancel: CancellationToken) -> hoist_remote::Result<Box<dyn RemoteChannel>> {
        self.dials.lock().unwrap().push(address.to_string());

        if cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        if let Some(message) = &self.dial_error {
            return Err(RemoteError::Connect {
                address: address.to_string(),
                message: message.clone(),
            });
        }

        Ok(Box::new(MockChannel {
            host: self.clone(),
            address: address.to_string(),
            cancel,
        }))
    }
}

struct MockChannel {
    host: MockHost,
    address: String,
    cancel: CancellationToken,
}

#[async_trait]
impl RemoteChannel for MockChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn run(&self, command: &str) -> hoist_remote::Result<String> {
        if self.cancel.is_cancelled() {
            return Err(RemoteError::Cancelled);
        }
        self.host.answer(command)
    }

    async fn run_uncancelled(&self, command: &str) -> hoist_remote::Result<String> {
        self.host.answer(command)
    }

    async fn stream(&self, command: &str, sink: &mut (dyn AsyncWrite + Send + Unpin)) -> hoist_remote::Result<()> {
        let output = self.run(command).await?;
        sink.write_all(output.as_bytes())
            .await
            .map_err(RemoteError::Spawn)?;
        Ok(())
    }

    async fn close(&self) -> hoist_remote::Result<()> {
        self.host.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A command failure with exit status 1
/// In-memory bucket and CDN
///
/// Objects are keyed `bucket/key`. Every call is recorded as one line, and
/// calls whose line starts with a registered prefix fail.
#[derive(Clone, Default)]
pub struct MockStore {
    objects: Arc<Mutex<BTreeMap<String, String>>>,
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, body: &str) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, key), body.to_string());
        self
    }

    /// Fails every call whose recorded line starts with `prefix`
    pub fn failing(self, prefix: &str) -> Self {
        self.failing.lock().unwrap().push(prefix.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(&format!("{}/{}", bucket, key)).cloned()
    }

    fn record(&self, call: String) -> Result<(), RemoteError> {
        let failed = self.failing.lock().unwrap().iter().any(|prefix| call.starts_with(prefix.as_str()));
        self.calls.lock().unwrap().push(call);
        if failed { Err(fail("simulated failure")) } else { Ok(()) }
    }

    fn keys_under(&self, bucket: &str, prefix: &str) -> Vec<String> {
        let root = format!("{}/", bucket);
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter_map(|path| path.strip_prefix(&root))
            .filter(|key| key.starts_with(prefix))
            .map(str::to_string)
            .collect()
    }
}

#[async_trait]
impl StaticStore for MockStore {
    async fn get_marker(&self, bucket: &str, key: &str) -> hoist_remote::Result<Option<String>> {
        self.record(format!("get {}/{}", bucket, key))?;
        Ok(self.object(bucket, key))
    }

    async fn put_marker(&self, bucket: &str, key: &str, value: &str) -> hoist_remote::Result<()> {
        self.record(format!("put {}/{} {}", bucket, key, value))?;
        self.objects
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, key), value.to_string());
        Ok(())
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> hoist_remote::Result<Vec<String>> {
        self.record(format!("list {}/{}", bucket, prefix))?;
        Ok(self.keys_under(bucket, prefix))
    }

    async fn list_prefixes(&self, bucket: &str, prefix: &str) -> hoist_remote::Result<Vec<String>> {
        self.record(format!("prefixes {}/{}", bucket, prefix))?;
        let mut prefixes: Vec<String> = self
            .keys_under(bucket, prefix)
            .iter()
            .filter_map(|key| {
                let rest = &key[prefix.len()..];
                rest.find('/').map(|end| format!("{}{}", prefix, &rest[..=end]))
            })
            .collect();
        prefixes.dedup();
        Ok(prefixes)
    }

    async fn copy_object(&self, bucket: &str, from: &str, to: &str) -> hoist_remote::Result<()> {
        self.record(format!("copy {}/{} {}", bucket, from, to))?;
        let body = self.object(bucket, from).unwrap_or_default();
        self.objects.lock().unwrap().insert(format!("{}/{}", bucket, to), body);
        Ok(())
    }

    async fn invalidate(&self, distribution: &str, paths: &[&str]) -> hoist_remote::Result<()> {
        self.record(format!("invalidate {} {}", distribution, paths.join(" ")))
    }
}

pub fn fail(stderr: &str) -> RemoteError {
    exit(1, stderr)
}

pub fn exit(code: i32, stderr: &str) -> RemoteError {
    RemoteError::CommandFailed {
        command: String::new(),
        status: Some(code),
        stderr: stderr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_stream_writes_output() {
        let host = MockHost::new(|_| Ok("line one\nline two".to_string()));
        let channel = host.dial("root@h", CancellationToken::new()).await.unwrap();

        let mut sink = Vec::new();
        channel.stream("docker logs api", &mut sink).await.unwrap();

        assert_eq!(sink, b"line one\nline two");
        assert_eq!(host.commands(), vec!["docker logs api"]);
    }

    #[tokio::test]
    async fn test_cancelled_dial_fails() {
        let host = MockHost::new(|_| Ok(String::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(host.dial("root@h", cancel).await, Err(RemoteError::Cancelled)));
        assert_eq!(host.dials(), vec!["root@h"]);
    }
}
