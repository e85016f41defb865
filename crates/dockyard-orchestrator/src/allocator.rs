//! Resource allocation for new containers: CPU core selection and memory
//! validation against the host's capacity.

use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

use dockyard_common::DockyardError;

/// Capacity of the host the panel manages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HostSpec {
    pub cores: usize,
    pub memory_mb: u64,
}

/// Pick `requested` distinct core indices at random and join them into a
/// cpuset string. With no request the container gets every core.
pub fn pick_cores<R: Rng>(
    rng: &mut R,
    host: &HostSpec,
    requested: Option<usize>,
) -> Result<String, DockyardError> {
    match requested {
        None | Some(0) => Ok((0..host.cores)
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")),
        Some(n) if n > host.cores => Err(DockyardError::validation(
            "cores",
            format!("requested {n} cores but the host has {}", host.cores),
        )),
        Some(n) => {
            let mut picked: Vec<usize> = sample(rng, host.cores, n).into_iter().collect();
            picked.sort_unstable();
            Ok(picked
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","))
        }
    }
}

/// The memory grant in MB: a request is taken verbatim, no request grants
/// the host's total physical memory.
pub fn grant_memory(host: &HostSpec, requested: Option<u64>) -> Result<u64, DockyardError> {
    match requested {
        None => Ok(host.memory_mb),
        Some(0) => Err(DockyardError::validation(
            "memory_mb",
            "memory grant must be non-zero",
        )),
        Some(n) => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const HOST: HostSpec = HostSpec {
        cores: 8,
        memory_mb: 16384,
    };

    #[test]
    fn picked_cores_are_distinct_and_in_range() {
        let mut rng = rand::rng();
        for _ in 0..50 {
            let cpuset = pick_cores(&mut rng, &HOST, Some(3)).unwrap();
            let cores: Vec<usize> = cpuset.split(',').map(|c| c.parse().unwrap()).collect();
            assert_eq!(cores.len(), 3);
            let distinct: HashSet<_> = cores.iter().collect();
            assert_eq!(distinct.len(), 3);
            assert!(cores.iter().all(|&c| c < HOST.cores));
        }
    }

    #[test]
    fn no_request_grants_every_core() {
        let mut rng = rand::rng();
        assert_eq!(
            pick_cores(&mut rng, &HOST, None).unwrap(),
            "0,1,2,3,4,5,6,7"
        );
    }

    #[test]
    fn oversubscription_is_a_validation_error() {
        let mut rng = rand::rng();
        assert!(matches!(
            pick_cores(&mut rng, &HOST, Some(9)),
            Err(DockyardError::Validation { field: "cores", .. })
        ));
    }

    #[test]
    fn no_memory_request_grants_host_total() {
        assert_eq!(grant_memory(&HOST, None).unwrap(), 16384);
    }

    #[test]
    fn memory_request_is_taken_verbatim() {
        assert_eq!(grant_memory(&HOST, Some(512)).unwrap(), 512);
        assert_eq!(grant_memory(&HOST, Some(32768)).unwrap(), 32768);
    }

    #[test]
    fn zero_memory_is_a_validation_error() {
        assert!(matches!(
            grant_memory(&HOST, Some(0)),
            Err(DockyardError::Validation {
                field: "memory_mb",
                ..
            })
        ));
    }
}
