use agentic_a2a::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn execution_context_strategy() -> impl Strategy<Value = ExecutionContext> {
    prop_oneof![
        Just(ExecutionContext::InDurableUnit),
        Just(ExecutionContext::InRetryableUnit),
        Just(ExecutionContext::Neither),
    ]
}

struct NoopClient;

#[async_trait::async_trait]
impl SubstrateClient for NoopClient {
    async fn send_a2a(
        &self,
        _target_type: &str,
        _kind: HandlerKind,
        request: A2aRequest,
    ) -> MessagingResult<A2aResponse> {
        Ok(A2aResponse::failure(
            request.correlation_id,
            &MessagingError::internal("not used"),
        ))
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    /// Property: every built request gets a fresh correlation id
    #[test]
    fn correlation_ids_are_unique(count in 1usize..300) {
        let mut seen = HashSet::new();
        for _ in 0..count {
            let request = A2aRequest::builder("a", "Caller", "t").text("x").build().unwrap();
            prop_assert!(seen.insert(request.correlation_id));
        }
    }

    /// Property: exactly one of the two paths runs, and it is the one the
    /// context calls for
    #[test]
    fn dispatch_runs_exactly_one_path(context in execution_context_strategy()) {
        let substrate = Arc::new(LocalSubstrate::new(context));
        let dispatcher = ContextAwareDispatcher::for_substrate(substrate.clone())
            .with_client(Arc::new(NoopClient));
        let durable_calls = Arc::new(AtomicU32::new(0));
        let direct_calls = Arc::new(AtomicU32::new(0));

        let durable = durable_calls.clone();
        let direct = direct_calls.clone();
        let route_in_process = runtime().block_on(dispatcher.dispatch(
            "prop_op",
            move || {
                let durable = durable.clone();
                async move {
                    durable.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }
            },
            move |route| async move {
                direct.fetch_add(1, Ordering::SeqCst);
                Ok(Some(route.is_in_process()))
            },
            DispatchOptions::default(),
        )).unwrap();

        let durable_runs = durable_calls.load(Ordering::SeqCst);
        let direct_runs = direct_calls.load(Ordering::SeqCst);
        prop_assert_eq!(durable_runs + direct_runs, 1);

        match context {
            ExecutionContext::InDurableUnit => {
                prop_assert_eq!(durable_runs, 1);
                prop_assert_eq!(substrate.units_started(), 1);
            }
            ExecutionContext::InRetryableUnit => {
                prop_assert_eq!(route_in_process, Some(true));
            }
            ExecutionContext::Neither => {
                prop_assert_eq!(route_in_process, Some(false));
            }
        }
        if context != ExecutionContext::InDurableUnit {
            prop_assert_eq!(substrate.units_started(), 0);
        }
    }

    /// Property: the first of any number of writes is the one kept
    #[test]
    fn capture_keeps_first_write(texts in proptest::collection::vec("[a-z]{1,8}", 1..20)) {
        let capture = ResponseCapture::new(CorrelationId::new());
        for text in &texts {
            capture.write_reply(text.clone(), serde_json::Value::Null);
        }
        prop_assert_eq!(&capture.reply().unwrap().text, &texts[0]);
        prop_assert_eq!(capture.discarded_replies(), texts.len() - 1);
    }

    /// Property: backoff never shrinks and never exceeds the cap
    #[test]
    fn backoff_is_monotonic_and_capped(
        initial_ms in 1u64..5_000,
        coefficient in 1.0f64..4.0,
        max_ms in 5_000u64..200_000,
        attempts in 2u32..12,
    ) {
        let policy = RetryPolicy::default()
            .with_initial_interval(Duration::from_millis(initial_ms))
            .with_backoff_coefficient(coefficient)
            .with_maximum_interval(Duration::from_millis(max_ms))
            .with_maximum_attempts(attempts);
        prop_assert!(policy.validate().is_ok());

        let mut previous = Duration::ZERO;
        for attempt in 1..attempts {
            let delay = policy.delay_after(attempt).unwrap();
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.maximum_interval);
            previous = delay;
        }
        prop_assert!(policy.delay_after(attempts).is_none());
    }

    /// Property: requests survive the wire unchanged
    #[test]
    fn requests_cross_the_wire_unchanged(
        text in "[ -~]{1,64}",
        key in "[a-z_]{1,12}",
        value in "[a-zA-Z0-9]{0,16}",
    ) {
        let request = A2aRequest::builder("agent", "Caller", "tenant")
            .text(text)
            .metadata(key, value)
            .build()
            .unwrap();
        let wire = serde_json::to_string(&request).unwrap();
        let back: A2aRequest = serde_json::from_str(&wire).unwrap();
        prop_assert_eq!(back, request);
    }
}
