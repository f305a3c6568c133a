//! Quorum reads across metadata store replicas
//!
//! A read is fanned out to every replica at once. The first value reported
//! by `agreement_level` replicas wins; replicas that fail or stay silent
//! only matter if too few remain to agree. Once a decision is made (or the
//! timeout expires) the remaining requests are dropped, which releases their
//! reply waiters.

use crate::meta::MetaReplica;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use nimbus_common::NamespaceId;
use nimbus_proto::SpaceUsage;
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuorumError {
    #[error("agreement level {agreement_level} is invalid for {replicas} replicas")]
    InvalidAgreementLevel {
        agreement_level: usize,
        replicas: usize,
    },

    /// Fewer than the agreement level answered successfully in time
    #[error("quorum not reached: {received} replies of {required} required ({failed} failed)")]
    TooFewReplies {
        received: usize,
        failed: usize,
        required: usize,
    },

    /// Enough replies, but no value was reported by enough of them
    #[error("quorum not reached: {distinct} distinct replies, at most {best} agree, {required} required")]
    Disagreement {
        best: usize,
        distinct: usize,
        required: usize,
    },
}

impl QuorumError {
    /// True for both not-reached outcomes
    #[must_use]
    pub const fn is_not_reached(&self) -> bool {
        matches!(self, Self::TooFewReplies { .. } | Self::Disagreement { .. })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct QuorumAggregator {
    agreement_level: usize,
    timeout: Duration,
}

impl QuorumAggregator {
    #[must_use]
    pub const fn new(agreement_level: usize, timeout: Duration) -> Self {
        Self {
            agreement_level,
            timeout,
        }
    }

    #[must_use]
    pub const fn agreement_level(&self) -> usize {
        self.agreement_level
    }

    /// Drive every replica request concurrently and return the agreed value
    pub async fn agree<T, E, F>(&self, requests: Vec<F>) -> Result<T, QuorumError>
    where
        F: Future<Output = Result<T, E>>,
        T: Eq + Hash + Clone,
        E: Display,
    {
        let required = self.agreement_level;
        if required == 0 || required > requests.len() {
            return Err(QuorumError::InvalidAgreementLevel {
                agreement_level: required,
                replicas: requests.len(),
            });
        }

        let mut pending: FuturesUnordered<F> = requests.into_iter().collect();
        let mut tally: HashMap<T, usize> = HashMap::new();
        let mut received = 0;
        let mut failed = 0;

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some(Ok(value)) => {
                        received += 1;
                        let count = tally.entry(value.clone()).or_insert(0);
                        *count += 1;
                        if *count >= required {
                            debug!("Quorum of {} reached after {} replies", required, received);
                            return Ok(value);
                        }
                    }
                    Some(Err(e)) => {
                        failed += 1;
                        warn!("Replica request failed: {}", e);
                    }
                    None => break,
                },
                () = &mut deadline => {
                    warn!(
                        "Quorum timeout after {:?}: {} replies, {} outstanding",
                        self.timeout,
                        received,
                        pending.len()
                    );
                    break;
                }
            }

            // No value can reach the agreement level any more
            let best = tally.values().copied().max().unwrap_or(0);
            if best + pending.len() < required {
                break;
            }
        }

        let best = tally.values().copied().max().unwrap_or(0);
        if received < required {
            Err(QuorumError::TooFewReplies {
                received,
                failed,
                required,
            })
        } else {
            Err(QuorumError::Disagreement {
                best,
                distinct: tally.len(),
                required,
            })
        }
    }
}

/// Space usage of a namespace, agreed by a quorum of replicas
pub struct SpaceUsageGetter {
    replicas: Vec<Arc<dyn MetaReplica>>,
    aggregator: QuorumAggregator,
}

impl SpaceUsageGetter {
    #[must_use]
    pub fn new(replicas: Vec<Arc<dyn MetaReplica>>, aggregator: QuorumAggregator) -> Self {
        Self {
            replicas,
            aggregator,
        }
    }

    pub async fn get_space_usage(&self, namespace: NamespaceId) -> Result<SpaceUsage, QuorumError> {
        let requests: Vec<BoxFuture<'_, _>> = self
            .replicas
            .iter()
            .map(|replica| {
                let replica = Arc::clone(replica);
                async move { replica.space_usage(namespace).await }.boxed()
            })
            .collect();
        self.aggregator.agree(requests).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ClientError, ClientResult};
    use async_trait::async_trait;
    use nimbus_proto::MetadataRecord;

    enum Behaviour {
        Reply(u64),
        Fail,
        Silent,
    }

    struct FakeReplica {
        name: String,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl MetaReplica for FakeReplica {
        fn name(&self) -> &str {
            &self.name
        }

        async fn space_usage(&self, _namespace: NamespaceId) -> ClientResult<SpaceUsage> {
            match self.behaviour {
                Behaviour::Reply(total_size) => Ok(SpaceUsage {
                    total_size,
                    live_keys: 1,
                }),
                Behaviour::Fail => Err(ClientError::Disconnected),
                Behaviour::Silent => std::future::pending().await,
            }
        }

        async fn lookup(&self, _namespace: NamespaceId, _key: &str) -> ClientResult<MetadataRecord> {
            Err(ClientError::Disconnected)
        }
    }

    fn getter(behaviours: Vec<Behaviour>, k: usize) -> SpaceUsageGetter {
        let replicas = behaviours
            .into_iter()
            .enumerate()
            .map(|(i, behaviour)| {
                Arc::new(FakeReplica {
                    name: format!("replica-{i}"),
                    behaviour,
                }) as Arc<dyn MetaReplica>
            })
            .collect();
        SpaceUsageGetter::new(replicas, QuorumAggregator::new(k, Duration::from_millis(200)))
    }

    fn usage(total_size: u64) -> SpaceUsage {
        SpaceUsage {
            total_size,
            live_keys: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_of_three_agree() {
        use Behaviour::Reply;
        let getter = getter(vec![Reply(500), Reply(400), Reply(500)], 2);
        assert_eq!(
            getter.get_space_usage(NamespaceId::new(1)).await,
            Ok(usage(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_distinct_is_disagreement() {
        use Behaviour::Reply;
        let getter = getter(vec![Reply(500), Reply(400), Reply(300)], 2);
        let err = getter.get_space_usage(NamespaceId::new(1)).await.unwrap_err();
        assert_eq!(
            err,
            QuorumError::Disagreement {
                best: 1,
                distinct: 3,
                required: 2
            }
        );
        assert!(err.is_not_reached());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_reply_before_timeout() {
        use Behaviour::{Reply, Silent};
        let getter = getter(vec![Reply(500), Silent, Silent], 2);
        let err = getter.get_space_usage(NamespaceId::new(1)).await.unwrap_err();
        assert_eq!(
            err,
            QuorumError::TooFewReplies {
                received: 1,
                failed: 0,
                required: 2
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_minority_failure_tolerated() {
        use Behaviour::{Fail, Reply, Silent};
        let getter = getter(vec![Fail, Reply(500), Silent, Reply(500)], 2);
        assert_eq!(
            getter.get_space_usage(NamespaceId::new(1)).await,
            Ok(usage(500))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_once_agreement_is_impossible() {
        use Behaviour::{Fail, Reply};
        let getter = getter(vec![Reply(500), Fail, Fail], 2);
        let err = getter.get_space_usage(NamespaceId::new(1)).await.unwrap_err();
        assert!(matches!(
            err,
            QuorumError::TooFewReplies { required: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_invalid_agreement_level() {
        let too_high = getter(vec![Behaviour::Reply(1)], 2);
        assert!(matches!(
            too_high.get_space_usage(NamespaceId::new(1)).await,
            Err(QuorumError::InvalidAgreementLevel { .. })
        ));
        let zero = getter(vec![Behaviour::Reply(1)], 0);
        assert!(matches!(
            zero.get_space_usage(NamespaceId::new(1)).await,
            Err(QuorumError::InvalidAgreementLevel { .. })
        ));
    }
}
