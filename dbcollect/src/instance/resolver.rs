use std::path::PathBuf;
use std::sync::Arc;

use tracing::Instrument;

use super::discovery::{HostInventory, candidate_homes, running_sids};
use super::probe::{ProbeOutcome, Prober};
use super::{Connection, Credentials, Instance};
use crate::command::CommandRunner;
use crate::config::ResolverConfig;
use crate::error::{CollectError, Result};
use crate::telemetry;

/// A running sid that passed the filters, with the homes to try.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Target {
    pub sid: String,
    pub connection: Connection,
    pub candidates: Vec<PathBuf>,
}

/// Binds running instances to a home and connection that works.
pub struct Resolver<R: CommandRunner, P: Prober> {
    config: ResolverConfig,
    credentials: Credentials,
    runner: Arc<R>,
    prober: Arc<P>,
}

impl<R: CommandRunner, P: Prober> Resolver<R, P> {
    pub fn new(config: ResolverConfig, credentials: Credentials, runner: Arc<R>, prober: Arc<P>) -> Self {
        Self {
            config,
            credentials,
            runner,
            prober,
        }
    }

    /// Running instances that pass the include/exclude lists and the
    /// credentials file, with their candidate homes. No connection is
    /// attempted here.
    pub async fn discover(&self) -> Result<Vec<Target>> {
        let sids = running_sids(self.runner.as_ref())
            .await
            .map_err(|e| CollectError::io("listing processes", e))?;
        tracing::info!("Running instances: {}", sids.join(", "));

        let host = HostInventory::load(self.runner.as_ref(), &self.config).await;

        let mut targets = Vec::new();
        for sid in sids {
            if !self.config.admits(&sid) {
                tracing::info!(sid = %sid, "excluded, skipping");
                continue;
            }
            if !self.credentials.is_enabled(&sid) {
                tracing::info!(sid = %sid, "disabled in credentials file, skipping");
                continue;
            }
            let candidates = candidate_homes(self.runner.as_ref(), &host, &self.config, &sid).await;
            targets.push(Target {
                connection: self.credentials.connection(&sid),
                sid,
                candidates,
            });
        }
        Ok(targets)
    }

    /// Probe the candidates of `target` in order and stop at the first
    /// that connects.
    pub async fn resolve(&self, target: &Target) -> Result<Instance> {
        let sid = target.sid.as_str();
        let mut last_message: Option<String> = None;

        for home in &target.candidates {
            let outcome = self.prober.probe(sid, home, &target.connection).await;
            match outcome {
                ProbeOutcome::Connected(info) => {
                    tracing::info!(
                        sid,
                        home = %home.display(),
                        status = %info.status,
                        version = ?info.version,
                        "instance resolved"
                    );
                    return Ok(Instance::new(sid, home, target.connection.clone()).with_probe(&info));
                }
                ProbeOutcome::WrongHome(message) => {
                    tracing::debug!(sid, home = %home.display(), "wrong home: {message}");
                    last_message = Some(message);
                }
                ProbeOutcome::Unrecognised(message) => {
                    tracing::warn!(sid, home = %home.display(), "probe failed: {message}");
                    last_message = Some(message);
                }
                ProbeOutcome::Blocked(message) => {
                    return Err(CollectError::InstanceBlocked {
                        sid: sid.to_string(),
                        message,
                    });
                }
                ProbeOutcome::BadCredentials(message) => {
                    return Err(CollectError::BadCredentials {
                        sid: sid.to_string(),
                        message,
                    });
                }
                ProbeOutcome::Network(message) => {
                    return Err(CollectError::Listener {
                        sid: sid.to_string(),
                        message,
                    });
                }
                ProbeOutcome::ToolingMissing(reason) => {
                    return Err(CollectError::ToolingMissing {
                        sid: sid.to_string(),
                        program: super::sqlplus_binary(home),
                        reason,
                    });
                }
                ProbeOutcome::TimedOut => {
                    return Err(CollectError::ProbeTimeout {
                        sid: sid.to_string(),
                        seconds: self.config.probe_timeout_secs,
                    });
                }
            }
        }

        Err(CollectError::NoValidHome {
            sid: sid.to_string(),
            detail: last_message.unwrap_or_else(|| {
                if target.candidates.is_empty() {
                    "no candidate homes".to_string()
                } else {
                    "all candidates rejected".to_string()
                }
            }),
        })
    }

    /// Discover and resolve every admitted instance.
    ///
    /// Per-instance failures are returned next to the sid; only a failure
    /// to list processes fails the call.
    pub async fn resolve_all(&self) -> Result<Vec<(String, Result<Instance>)>> {
        async {
            let targets = self.discover().await?;
            let mut resolved = Vec::with_capacity(targets.len());
            for target in targets {
                let result = self.resolve(&target).await;
                if let Err(err) = &result {
                    tracing::error!(sid = %target.sid, code = %err.code(), "{err}");
                }
                resolved.push((target.sid, result));
            }
            Ok::<_, CollectError>(resolved)
        }
        .instrument(telemetry::resolve_span())
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::command::SystemRunner;
    use crate::instance::{InstanceStatus, ProbeInfo};

    struct Scripted {
        outcomes: Mutex<VecDeque<ProbeOutcome>>,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<ProbeOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Prober for Scripted {
        async fn probe(&self, _sid: &str, home: &Path, _connection: &Connection) -> ProbeOutcome {
            self.calls.lock().push(home.to_path_buf());
            self.outcomes
                .lock()
                .pop_front()
                .unwrap_or(ProbeOutcome::Unrecognised("exhausted".into()))
        }
    }

    fn target(n: usize) -> Target {
        Target {
            sid: "DB1".into(),
            connection: Connection::Local,
            candidates: (0..n).map(|i| PathBuf::from(format!("/u01/home{i}"))).collect(),
        }
    }

    fn resolver(prober: Arc<Scripted>) -> Resolver<SystemRunner, Scripted> {
        Resolver::new(
            ResolverConfig::default(),
            Credentials::default(),
            Arc::new(SystemRunner),
            prober,
        )
    }

    fn open() -> ProbeOutcome {
        ProbeOutcome::Connected(ProbeInfo {
            status: InstanceStatus::Open,
            version: Some(19),
            cpu_count: Some(4),
        })
    }

    #[tokio::test]
    async fn test_wrong_home_then_bad_credentials_stops() {
        let prober = Scripted::new(vec![
            ProbeOutcome::WrongHome("ORA-27101".into()),
            ProbeOutcome::BadCredentials("ORA-01017".into()),
            open(),
        ]);
        let err = resolver(Arc::clone(&prober)).resolve(&target(3)).await.unwrap_err();
        assert!(matches!(err, CollectError::BadCredentials { .. }));
        assert_eq!(prober.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let prober = Scripted::new(vec![ProbeOutcome::WrongHome("ORA-12547".into()), open(), open()]);
        let instance = resolver(Arc::clone(&prober)).resolve(&target(3)).await.unwrap();
        assert_eq!(instance.home, PathBuf::from("/u01/home1"));
        assert_eq!(instance.status, InstanceStatus::Open);
        assert_eq!(instance.cpu_count, Some(4));
        assert_eq!(
            *prober.calls.lock(),
            [PathBuf::from("/u01/home0"), PathBuf::from("/u01/home1")]
        );
    }

    #[tokio::test]
    async fn test_exhaustion_carries_last_message() {
        let prober = Scripted::new(vec![
            ProbeOutcome::Unrecognised("SP2-0310: odd".into()),
            ProbeOutcome::WrongHome("ORA-27101: realm".into()),
        ]);
        let err = resolver(prober).resolve(&target(2)).await.unwrap_err();
        match err {
            CollectError::NoValidHome { detail, .. } => assert_eq!(detail, "ORA-27101: realm"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let prober = Scripted::new(vec![]);
        let err = resolver(Arc::clone(&prober)).resolve(&target(0)).await.unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::E001);
        assert!(prober.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_failures() {
        for (outcome, code) in [
            (ProbeOutcome::Blocked("ORA-01033".into()), "E003"),
            (ProbeOutcome::Network("ORA-12541".into()), "E004"),
            (ProbeOutcome::ToolingMissing("exec".into()), "E005"),
            (ProbeOutcome::TimedOut, "E006"),
        ] {
            let prober = Scripted::new(vec![outcome, open()]);
            let err = resolver(Arc::clone(&prober)).resolve(&target(2)).await.unwrap_err();
            assert_eq!(err.code().as_str(), code);
            assert!(err.is_instance_scoped());
            assert_eq!(prober.calls.lock().len(), 1);
        }
    }
}
