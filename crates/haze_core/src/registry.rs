use crate::config::{HazeConfig, ProxySetup};
use crate::error::LifecycleError;
use crate::pipeline::RequestPipeline;
use crate::server::{self, ProxyState};
use haze_net::CertificateAuthority;
use hyper::server::conn::AddrIncoming;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, OnceCell};
use tracing::{error, info};

struct ProxyInstance {
    local_addr: SocketAddr,
    cancel: oneshot::Sender<()>,
    finished: watch::Receiver<bool>,
}

/// Owned table of running proxy instances keyed by id.
pub struct InstanceRegistry {
    config: HazeConfig,
    ca: OnceCell<Arc<CertificateAuthority>>,
    instances: Mutex<HashMap<String, ProxyInstance>>,
}

impl InstanceRegistry {
    pub fn new(config: HazeConfig) -> Self {
        Self {
            config,
            ca: OnceCell::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HazeConfig {
        &self.config
    }

    async fn authority(&self) -> Result<Arc<CertificateAuthority>, LifecycleError> {
        let ca = self
            .ca
            .get_or_try_init(|| async {
                CertificateAuthority::load_or_generate(&self.config.cert, &self.config.key)
                    .map(Arc::new)
            })
            .await?;
        Ok(ca.clone())
    }

    /// Binds and starts serving `setup`. Ids are unique: a live id is never replaced.
    pub async fn start(&self, setup: ProxySetup) -> Result<SocketAddr, LifecycleError> {
        if self.is_running(&setup.id) {
            return Err(LifecycleError::AlreadyRunning(setup.id));
        }

        let pipeline = RequestPipeline::new(&setup)?;
        let ca = self.authority().await?;

        let addr = setup.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| LifecycleError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| LifecycleError::Bind { addr, source })?;
        let mut incoming = AddrIncoming::from_listener(listener)?;
        incoming.set_nodelay(true);

        let (cancel, shutdown) = oneshot::channel();
        let (done, finished) = watch::channel(false);
        {
            let mut instances = self.instances.lock();
            if instances.contains_key(&setup.id) {
                return Err(LifecycleError::AlreadyRunning(setup.id));
            }
            instances.insert(
                setup.id.clone(),
                ProxyInstance {
                    local_addr,
                    cancel,
                    finished,
                },
            );
        }

        let state = Arc::new(ProxyState::new(pipeline, ca));
        let id = setup.id.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(incoming, state, shutdown).await {
                error!("Instance {} stopped with error: {}", id, e);
            }
            let _ = done.send(true);
        });

        info!("Hazetunnel listening at {} (id {})", local_addr, setup.id);
        Ok(local_addr)
    }

    /// Cancels the instance's accept loop. Returns whether `id` was running.
    pub fn stop(&self, id: &str) -> bool {
        let Some(instance) = self.instances.lock().remove(id) else {
            return false;
        };
        let _ = instance.cancel.send(());
        info!("Stopped instance {}", id);
        true
    }

    pub fn stop_all(&self) {
        let drained: Vec<(String, ProxyInstance)> = self.instances.lock().drain().collect();
        for (id, instance) in drained {
            let _ = instance.cancel.send(());
            info!("Stopped instance {}", id);
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.instances.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn local_addr(&self, id: &str) -> Option<SocketAddr> {
        self.instances.lock().get(id).map(|i| i.local_addr)
    }

    /// Starts `setup` and waits until its server task ends, either stopped or failed.
    pub async fn launch(&self, setup: ProxySetup) -> Result<(), LifecycleError> {
        let id = setup.id.clone();
        self.start(setup).await?;
        let finished = self.instances.lock().get(&id).map(|i| i.finished.clone());
        if let Some(mut finished) = finished {
            let _ = finished.wait_for(|done| *done).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn registry(tag: &str) -> InstanceRegistry {
        let dir: PathBuf =
            std::env::temp_dir().join(format!("haze-registry-{}-{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        InstanceRegistry::new(HazeConfig {
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
            verbose: false,
        })
    }

    fn setup(id: &str) -> ProxySetup {
        ProxySetup {
            id: id.into(),
            addr: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_then_stop() {
        let registry = registry("start-stop");
        let addr = registry.start(setup("a")).await.unwrap();
        assert_ne!(addr.port(), 0);
        assert!(registry.is_running("a"));
        assert_eq!(registry.local_addr("a"), Some(addr));

        assert!(!registry.stop("b"));
        assert!(registry.is_running("a"));

        assert!(registry.stop("a"));
        assert!(!registry.is_running("a"));
        assert!(!registry.stop("a"));
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let registry = registry("duplicate");
        let first = registry.start(setup("a")).await.unwrap();
        let err = registry.start(setup("a")).await.unwrap_err();
        assert!(matches!(err, LifecycleError::AlreadyRunning(id) if id == "a"));
        assert_eq!(registry.local_addr("a"), Some(first));
        registry.stop_all();
        assert!(registry.ids().is_empty());
    }

    #[tokio::test]
    async fn bind_failure_registers_nothing() {
        let registry = registry("bind");
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut conflicting = setup("c");
        conflicting.port = taken.local_addr().unwrap().port();
        let err = registry.start(conflicting).await.unwrap_err();
        assert!(matches!(err, LifecycleError::Bind { .. }));
        assert!(!registry.is_running("c"));
    }

    #[tokio::test]
    async fn launch_returns_after_stop() {
        let registry = Arc::new(registry("launch"));
        let runner = registry.clone();
        let handle = tokio::spawn(async move { runner.launch(setup("l")).await });
        while !registry.is_running("l") {
            tokio::task::yield_now().await;
        }
        assert!(registry.stop("l"));
        handle.await.unwrap().unwrap();
    }
}
