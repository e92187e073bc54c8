//! Capacity tests
//!
//! Hammer the pool from many tasks across several keys and check that the
//! per-key and global caps hold and that no client is ever lent twice.

#[cfg(test)]
mod capacity_tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use futures::future::join_all;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use vdbc_pool::PoolConfig;

    use crate::fixtures::{PoolShape, pool_with, register_tenants};

    const TENANTS: [&str; 3] = ["alpha", "beta", "gamma"];

    /// Per-key and global caps hold while 60 tasks compete for clients
    #[rstest]
    #[case::tight(PoolShape::Tight)]
    #[case::contended(PoolShape::Contended)]
    #[case::roomy(PoolShape::Roomy)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_caps_hold_under_concurrent_load(#[case] shape: PoolShape) -> Result<()> {
        let config = shape.config();
        let (pool, factory) = pool_with(config.clone());
        register_tenants(&pool, &TENANTS)?;
        let lent = Arc::new(Mutex::new(HashSet::new()));

        let tasks = (0..60).map(|i| {
            let pool = pool.clone();
            let lent = lent.clone();
            let tenant = TENANTS[i % TENANTS.len()];
            tokio::spawn(async move {
                let client = pool
                    .get_client(tenant)
                    .await
                    .with_context(|| format!("borrow for {tenant} failed"))?;
                assert!(
                    lent.lock().insert(client.serial),
                    "client {} lent twice",
                    client.serial
                );
                assert_eq!(client.database, tenant, "client served for the wrong key");

                let hit = client.search("docs").await;
                tokio::time::sleep(Duration::from_millis(2)).await;

                lent.lock().remove(&client.serial);
                pool.return_client(tenant, client).await;
                anyhow::Ok(hit)
            })
        });

        for outcome in join_all(tasks).await {
            outcome.context("task panicked")??;
        }

        println!(
            "[{}] created {} clients, peak {} alive",
            shape.display_name(),
            factory.created(),
            factory.peak()
        );
        assert!(
            factory.peak() <= config.max_total(),
            "peak {} exceeds global cap {}",
            factory.peak(),
            config.max_total()
        );
        for tenant in TENANTS {
            let count = factory.database(tenant);
            assert!(
                count.peak <= config.max_total_per_key(),
                "{tenant}: peak {} exceeds per-key cap {}",
                count.peak,
                config.max_total_per_key()
            );
        }
        assert_eq!(pool.total_active_client_number(), 0);
        assert_eq!(pool.live_client_number(), factory.live());
        assert_eq!(pool.total_idle_client_number(), factory.live());
        Ok(())
    }

    /// Every borrow is eventually served when the global cap is smaller than
    /// the number of keys, because idle clients of other keys are reclaimed
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_global_cap_smaller_than_key_count() -> Result<()> {
        let config = PoolConfig::new(0, 1, 1)
            .with_max_total(1)
            .with_max_block_wait(Duration::from_secs(5))
            .with_time_between_eviction_runs(Duration::ZERO);
        let (pool, factory) = pool_with(config);
        register_tenants(&pool, &TENANTS)?;

        let tasks = (0..30).map(|i| {
            let pool = pool.clone();
            let tenant = TENANTS[i % TENANTS.len()];
            tokio::spawn(async move {
                let client = pool.get_client(tenant).await?;
                tokio::task::yield_now().await;
                pool.return_client(tenant, client).await;
                anyhow::Ok(())
            })
        });
        for outcome in join_all(tasks).await {
            outcome??;
        }

        assert_eq!(factory.peak(), 1);
        assert_eq!(pool.live_client_number(), 1);
        assert_eq!(factory.created(), factory.destroyed() + 1);
        Ok(())
    }

    /// Waiters on a full key are served in turn as clients come back
    #[rstest]
    #[case(1, 10)]
    #[case(2, 10)]
    #[case(4, 25)]
    #[tokio::test(start_paused = true)]
    async fn test_waiters_drain_through_a_full_key(
        #[case] per_key: usize,
        #[case] borrowers: usize,
    ) -> Result<()> {
        let config = PoolConfig::new(0, per_key, per_key)
            .with_max_block_wait(Duration::from_secs(60))
            .with_time_between_eviction_runs(Duration::ZERO);
        let (pool, factory) = pool_with(config);

        let tasks = (0..borrowers).map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                let client = pool.get_client("shared").await?;
                tokio::time::sleep(Duration::from_millis(100)).await;
                pool.return_client("shared", client).await;
                anyhow::Ok(())
            })
        });
        for outcome in join_all(tasks).await {
            outcome??;
        }

        assert_eq!(factory.created(), per_key);
        assert_eq!(factory.peak(), per_key);
        let stats = pool.stats("shared").context("sub-pool exists")?;
        assert_eq!(stats.borrowed, borrowers as u64);
        assert_eq!(stats.current.waiting(), 0);
        Ok(())
    }
}
