//! Scenario tests
//!
//! Walk through the situations a service using the pool runs into: warming a
//! key up, steady borrow/return traffic, a saturated tenant, tenants living in
//! separate databases, and a tenant whose server refuses connections.

#[cfg(test)]
mod scenario_tests {
    use std::error::Error as _;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::time::Instant;
    use vdbc_core::PoolError;
    use vdbc_pool::{BackoffStrategy, PoolConfig, RetryPolicy};

    use crate::fixtures::{
        DEFAULT_DATABASE, FakeServerError, FakeVectorFactory, PoolShape, pool_with,
        pool_with_factory, register_tenants,
    };

    fn quiet(config: PoolConfig) -> PoolConfig {
        config.with_time_between_eviction_runs(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_warm_up_then_serve_from_idle() -> Result<()> {
        let (pool, factory) = pool_with(quiet(PoolConfig::new(2, 5, 10)));

        let created = pool.prepare_pool("tenant").await?;
        assert_eq!(created, 2);
        assert_eq!(pool.idle_client_number("tenant"), 2);

        let client = pool.get_client("tenant").await?;
        assert_eq!(factory.created(), 2, "borrow should be served from warm idle clients");
        assert_eq!(pool.idle_client_number("tenant"), 1);
        assert_eq!(pool.active_client_number("tenant"), 1);

        pool.return_client("tenant", client).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_burst_then_trim_to_idle_cap() -> Result<()> {
        let (pool, factory) = pool_with(quiet(PoolConfig::new(0, 2, 10)));

        let mut burst = Vec::new();
        for _ in 0..6 {
            burst.push(pool.get_client("tenant").await?);
        }
        assert_eq!(pool.active_client_number("tenant"), 6);
        let oldest: Vec<u64> = burst.iter().take(4).map(|client| client.serial).collect();

        for client in burst {
            pool.return_client("tenant", client).await;
        }

        assert_eq!(pool.idle_client_number("tenant"), 2);
        assert_eq!(pool.active_client_number("tenant"), 0);
        assert_eq!(factory.destroyed_serials(), oldest, "the oldest returns are trimmed first");
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_tenant_times_out_without_blocking_others() -> Result<()> {
        let config = quiet(PoolConfig::new(0, 1, 1)).with_max_block_wait(Duration::from_millis(200));
        let (pool, _factory) = pool_with(config);
        register_tenants(&pool, &["busy", "calm"])?;

        let held = pool.get_client("busy").await?;

        let started = Instant::now();
        let err = pool
            .get_client("busy")
            .await
            .expect_err("busy tenant has no capacity left");
        let waited = started.elapsed();
        assert!(matches!(err, PoolError::Exhausted { .. }), "unexpected error: {err}");
        assert_eq!(err.key(), Some("busy"));
        assert!(
            waited >= Duration::from_millis(200) && waited < Duration::from_millis(300),
            "waited {waited:?}"
        );

        let calm = pool.get_client("calm").await?;
        assert_eq!(calm.database, "calm");

        pool.return_client("busy", held).await;
        pool.return_client("calm", calm).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_tenants_connect_to_their_own_database() -> Result<()> {
        let (pool, factory) = pool_with(quiet(PoolConfig::new(0, 2, 5)));
        register_tenants(&pool, &["acme", "globex"])?;

        let acme = pool.get_client("acme").await?;
        let globex = pool.get_client("globex").await?;
        let walk_in = pool.get_client("walk_in").await?;

        assert_eq!(acme.database, "acme");
        assert_eq!(globex.database, "globex");
        assert_eq!(walk_in.database, DEFAULT_DATABASE);
        assert_eq!(acme.uri, "http://vectors.test:19530");
        assert_eq!(factory.database("acme").live, 1);
        assert_eq!(
            pool.keys(),
            vec!["acme".to_string(), "globex".to_string(), "walk_in".to_string()]
        );

        pool.return_client("acme", acme).await;
        pool.return_client("globex", globex).await;
        pool.return_client("walk_in", walk_in).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_refused_tenant_surfaces_factory_error() -> Result<()> {
        let (pool, factory) = pool_with(quiet(PoolConfig::new(0, 2, 5)));
        register_tenants(&pool, &["down"])?;
        factory.refuse("down");

        let err = pool.get_client("down").await.expect_err("server refuses");
        assert!(!err.is_retryable());
        let source = err
            .source()
            .and_then(|source| source.downcast_ref::<FakeServerError>())
            .context("factory error is kept as the source")?;
        assert!(matches!(source, FakeServerError::Refused { .. }));
        assert_eq!(pool.live_client_number(), 0);

        // Retrying does not hide a creation failure
        let policy = RetryPolicy::new(5, BackoffStrategy::new(1, 10));
        let err = pool
            .get_client_with_retry("down", &policy)
            .await
            .expect_err("still refused");
        assert!(matches!(err, PoolError::Creation { .. }));
        assert_eq!(factory.created(), 0);

        factory.allow("down");
        let client = pool.get_client("down").await?;
        pool.return_client("down", client).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_revoked_token_for_one_tenant() -> Result<()> {
        let (pool, _factory) = pool_with(quiet(PoolConfig::new(0, 2, 5)));
        let revoked = pool
            .default_connect_config()
            .for_database("revoked_tenant")
            .with_token("revoked");
        pool.config_for_key("revoked_tenant", revoked)?;

        let err = pool.get_client("revoked_tenant").await.expect_err("unauthorized");
        assert_eq!(
            err.to_string(),
            "Failed to create client for key 'revoked_tenant': access to database 'revoked_tenant' denied"
        );

        let other = pool.get_client("fine_tenant").await?;
        pool.return_client("fine_tenant", other).await;
        Ok(())
    }

    #[tokio::test]
    async fn test_unhealthy_clients_are_replaced_on_borrow() -> Result<()> {
        let (pool, factory) = pool_with(quiet(PoolConfig::new(2, 2, 2).with_test_on_borrow(true)));
        pool.prepare_pool("tenant").await?;

        factory.set_unhealthy(true);
        let client = pool.get_client("tenant").await?;

        // Both warm clients fail validation; the fresh one is handed out as is.
        assert_eq!(factory.destroyed(), 2);
        assert_eq!(factory.created(), 3);
        assert_eq!(client.serial, 2);
        assert_eq!(pool.idle_client_number("tenant"), 0);

        factory.set_unhealthy(false);
        pool.return_client("tenant", client).await;
        Ok(())
    }

    #[rstest]
    #[case::tight(PoolShape::Tight)]
    #[case::contended(PoolShape::Contended)]
    #[case::roomy(PoolShape::Roomy)]
    #[tokio::test]
    async fn test_stats_follow_traffic(#[case] shape: PoolShape) -> Result<()> {
        let (pool, _factory) = pool_with(shape.config());

        let client = pool.get_client("tenant").await?;
        let stats = pool.stats("tenant").context("sub-pool exists")?;
        assert_eq!(stats.key, "tenant");
        assert_eq!(stats.current.active(), 1);
        assert_eq!(stats.created, 1);
        assert!(stats.fetch_per_second >= 1.0);

        pool.return_client("tenant", client).await;
        let totals = pool.stats_total();
        assert_eq!(totals.idle(), 1);
        assert_eq!(totals.active(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_connect_is_not_cut_short_by_block_wait() -> Result<()> {
        let factory = FakeVectorFactory::new().with_latency(Duration::from_millis(150));
        let config = quiet(PoolConfig::new(0, 1, 1)).with_max_block_wait(Duration::from_millis(100));
        let (pool, _factory) = pool_with_factory(config, factory);

        let started = Instant::now();
        let client = pool.get_client("tenant").await?;
        assert_eq!(started.elapsed(), Duration::from_millis(150));
        assert_eq!(pool.live_client_number(), 1);

        pool.return_client("tenant", client).await;
        Ok(())
    }
}
