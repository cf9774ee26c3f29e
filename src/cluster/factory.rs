//! Cluster construction by algorithm name.

use crate::cluster::swrr::SmoothWeightedRoundRobin;
use crate::cluster::wr::WeightedRandom;
use crate::cluster::wrr::WeightedRoundRobin;
use crate::cluster::{Algorithm, Cluster, LoadBalancer, ServiceConfig};
use crate::error::RegistryResult;
use crate::eviction::Evictor;

/// Build an empty cluster for `config`.
///
/// The algorithm name is matched case-insensitively and stored upper-cased
/// in the cluster's config.
pub fn build(mut config: ServiceConfig, evictor: Evictor) -> RegistryResult<Cluster> {
    let algorithm: Algorithm = config.load_balance.parse()?;
    config.load_balance = algorithm.as_str().to_string();

    let balancer: Box<dyn LoadBalancer> = match algorithm {
        Algorithm::Wr => Box::new(WeightedRandom::new()),
        Algorithm::Wrr => Box::new(WeightedRoundRobin::new()),
        Algorithm::Swrr => Box::new(SmoothWeightedRoundRobin::new()),
    };

    Ok(Cluster::new(config, algorithm, balancer, evictor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;

    #[test]
    fn test_build_each_algorithm() {
        for (name, expected) in [("wr", Algorithm::Wr), ("Wrr", Algorithm::Wrr), ("SWRR", Algorithm::Swrr)] {
            let cluster = build(ServiceConfig::new("svc", name), Evictor::disabled()).unwrap();
            assert_eq!(cluster.algorithm(), expected);
            assert_eq!(cluster.config().load_balance, expected.as_str());
            assert_eq!(cluster.total(), 0);
        }
    }

    #[test]
    fn test_build_unsupported() {
        let err = build(ServiceConfig::new("svc", "hash"), Evictor::disabled()).unwrap_err();
        assert!(matches!(err, RegistryError::UnsupportedAlgorithm(name) if name == "hash"));
    }
}
