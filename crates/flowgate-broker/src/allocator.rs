//! Backend allocator: ports and weights for the backends of one instance.
//!
//! Pure functions over a borrowed backend slice. Callers append the result.

use std::collections::HashSet;

use flowgate_core::BackendPoolConfig;
use flowgate_state::{Backend, DEFAULT_BACKEND_WEIGHT};

use crate::error::{BrokerError, BrokerResult};

/// Assign the lowest free pool port to a new backend.
///
/// A `requested_weight` of zero selects the default weight.
pub fn allocate(
    existing: &[Backend],
    pool: &BackendPoolConfig,
    name: &str,
    url: &str,
    requested_weight: u32,
) -> BrokerResult<Backend> {
    let used: HashSet<u16> = existing.iter().map(|b| b.port).collect();
    let (base, end) = pool_range(pool);
    let port = (base..end)
        .filter_map(|p| u16::try_from(p).ok())
        .find(|p| !used.contains(p))
        .ok_or(BrokerError::PoolExhausted { base, end })?;

    Ok(Backend {
        name: name.to_string(),
        url: url.to_string(),
        weight: weight_or_default(requested_weight),
        port,
    })
}

/// Build a backend on an explicitly requested port. The port must be inside
/// the pool and not yet taken.
pub fn reserve(
    existing: &[Backend],
    pool: &BackendPoolConfig,
    name: &str,
    url: &str,
    port: u16,
    requested_weight: u32,
) -> BrokerResult<Backend> {
    let (base, end) = pool_range(pool);
    if !(base..end).contains(&u32::from(port)) {
        return Err(BrokerError::Conflict(format!(
            "port {port} is outside the backend pool {base}..{end}"
        )));
    }
    if existing.iter().any(|b| b.port == port) {
        return Err(BrokerError::Conflict(format!("port {port} is already in use")));
    }
    Ok(Backend {
        name: name.to_string(),
        url: url.to_string(),
        weight: weight_or_default(requested_weight),
        port,
    })
}

/// Fail with `Conflict` if a backend already targets `candidate_url`.
pub fn validate_unique(existing: &[Backend], candidate_url: &str) -> BrokerResult<()> {
    if existing.iter().any(|b| b.url == candidate_url) {
        return Err(BrokerError::Conflict(format!(
            "backend url {candidate_url} is already bound"
        )));
    }
    Ok(())
}

fn pool_range(pool: &BackendPoolConfig) -> (u32, u32) {
    let base = u32::from(pool.port_base);
    (base, base + u32::from(pool.pool_size))
}

fn weight_or_default(requested: u32) -> u32 {
    if requested == 0 {
        DEFAULT_BACKEND_WEIGHT
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: u16) -> BackendPoolConfig {
        BackendPoolConfig {
            port_base: 8001,
            pool_size: size,
        }
    }

    fn backend(name: &str, port: u16) -> Backend {
        Backend {
            name: name.to_string(),
            url: format!("{name}.example.com"),
            weight: 5,
            port,
        }
    }

    #[test]
    fn picks_lowest_free_port() {
        let b = allocate(&[], &pool(10), "b1", "foo.example.com", 0).unwrap();
        assert_eq!(b.port, 8001);
        assert_eq!(b.weight, DEFAULT_BACKEND_WEIGHT);

        let existing = vec![backend("a", 8001), backend("c", 8003)];
        let b = allocate(&existing, &pool(10), "b2", "bar.example.com", 4).unwrap();
        assert_eq!(b.port, 8002);
        assert_eq!(b.weight, 4);
        assert_eq!(existing.len(), 2);
    }

    #[test]
    fn exhausted_pool() {
        let existing = vec![backend("a", 8001), backend("b", 8002)];
        let err = allocate(&existing, &pool(2), "c", "c.example.com", 0).unwrap_err();
        assert!(matches!(err, BrokerError::PoolExhausted { base: 8001, end: 8003 }));
    }

    #[test]
    fn repeated_allocation_stays_unique_and_in_range() {
        let pool = pool(10);
        let mut backends = Vec::new();
        for i in 0..10 {
            let b = allocate(&backends, &pool, &format!("b{i}"), &format!("u{i}"), 0).unwrap();
            backends.push(b);
        }
        let ports: HashSet<u16> = backends.iter().map(|b| b.port).collect();
        assert_eq!(ports.len(), 10);
        assert!(ports.iter().all(|p| (8001..8011).contains(p)));
        assert!(allocate(&backends, &pool, "x", "x", 0).is_err());
    }

    #[test]
    fn freed_port_is_reused() {
        let existing = vec![backend("a", 8001), backend("c", 8003)];
        let b = allocate(&existing[1..], &pool(10), "b", "b.example.com", 0).unwrap();
        assert_eq!(b.port, 8001);
    }

    #[test]
    fn reserve_checks_range_and_collisions() {
        let existing = vec![backend("a", 8001)];
        assert_eq!(
            reserve(&existing, &pool(10), "b", "b", 8005, 2).unwrap().port,
            8005
        );
        assert!(matches!(
            reserve(&existing, &pool(10), "b", "b", 8001, 0),
            Err(BrokerError::Conflict(_))
        ));
        assert!(matches!(
            reserve(&existing, &pool(10), "b", "b", 9000, 0),
            Err(BrokerError::Conflict(_))
        ));
    }

    #[test]
    fn duplicate_url_conflicts() {
        let existing = vec![backend("a", 8001)];
        assert!(validate_unique(&existing, "b.example.com").is_ok());
        assert!(matches!(
            validate_unique(&existing, "a.example.com"),
            Err(BrokerError::Conflict(_))
        ));
    }
}
