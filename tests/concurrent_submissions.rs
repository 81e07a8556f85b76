use std::sync::Arc;
use std::time::Duration;

use papertrade::{
    AppConfig, Broker, ExecutionFilter, InMemoryFeed, OrderFilter, OrderRequest, OrderSide,
    OrderStatus, PaperBroker,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

async fn shared_broker(workers: usize) -> Arc<PaperBroker> {
    let feed = Arc::new(InMemoryFeed::with_prices([
        ("EURUSD", dec!(1.1)),
        ("GBPUSD", dec!(1.27)),
        ("BTCUSDT", dec!(65000)),
    ]));
    let mut config = AppConfig::default();
    config.account.initial_balance = dec!(1000000);
    config.execution.fill_delay_ms = 5;
    config.execution.fill_jitter_ms = 5;
    config.execution.workers = workers;
    config.execution.reevaluate_interval_ms = 20;
    let broker = Arc::new(PaperBroker::new(feed, &config));
    broker.connect().await.expect("connect should succeed");
    broker
}

async fn wait_until_settled(broker: &PaperBroker) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let open = broker
            .get_orders(OrderFilter::default().status(OrderStatus::Pending).limit(usize::MAX))
            .await;
        if open.is_empty() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} orders still pending",
            open.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Racing submissions with one client token create exactly one order.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_token_from_many_tasks_creates_one_order() {
    let broker = shared_broker(4).await;

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let broker = broker.clone();
            tokio::spawn(async move {
                broker
                    .create_order(
                        OrderRequest::market("EURUSD", OrderSide::Buy, dec!(100))
                            .with_client_id("retry-storm"),
                    )
                    .await
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().expect("submission should succeed"));
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "every submission must resolve to one order");

    wait_until_settled(&broker).await;
    assert_eq!(broker.get_orders(OrderFilter::default()).await.len(), 1);
    assert_eq!(
        broker.get_executions(ExecutionFilter::default()).await.len(),
        1
    );
}

/// Concurrent fills across symbols never lose a balance or position update.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_fills_conserve_balance() {
    let broker = shared_broker(8).await;
    let symbols = ["EURUSD", "GBPUSD", "BTCUSDT"];

    let handles: Vec<_> = (0..90)
        .map(|i| {
            let broker = broker.clone();
            let symbol = symbols[i % symbols.len()];
            let side = if i % 4 == 0 { OrderSide::Sell } else { OrderSide::Buy };
            let quantity = if symbol == "BTCUSDT" { dec!(0.01) } else { dec!(1000) };
            tokio::spawn(async move {
                broker
                    .create_order(OrderRequest::market(symbol, side, quantity))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().expect("submission should succeed");
    }

    wait_until_settled(&broker).await;

    let executions = broker
        .get_executions(ExecutionFilter::default().limit(usize::MAX))
        .await;
    assert_eq!(executions.len(), 90);

    let moved: Decimal = executions.iter().map(|e| e.cash_delta()).sum();
    assert_eq!(broker.get_balance().await["USD"], dec!(1000000) + moved);
    assert!(broker.get_balance().await["USD"] >= Decimal::ZERO);

    for symbol in symbols {
        let net: Decimal = executions
            .iter()
            .filter(|e| e.symbol == symbol)
            .map(|e| e.side.sign() * e.quantity)
            .sum();
        let held = broker
            .get_position(symbol)
            .await
            .map(|p| p.quantity)
            .unwrap_or(Decimal::ZERO);
        assert_eq!(held, net, "position drift on {symbol}");
    }
}

/// Cancel racing the fill: exactly one of them wins.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_and_fill_race_has_one_winner() {
    let broker = shared_broker(4).await;

    for _ in 0..20 {
        let order_id = broker
            .create_order(OrderRequest::market("EURUSD", OrderSide::Sell, dec!(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(4)).await;
        let cancelled = broker.cancel_order(&order_id).await.unwrap();

        wait_until_settled(&broker).await;
        let order = broker.get_order(&order_id).await.unwrap();
        let executions = broker
            .get_executions(ExecutionFilter::default().order_id(order_id.clone()))
            .await;

        if cancelled {
            assert_eq!(order.status, OrderStatus::Cancelled);
            assert!(executions.is_empty());
        } else {
            assert_eq!(order.status, OrderStatus::Filled);
            assert_eq!(executions.len(), 1);
        }
    }
}
