/// Receives the next [`LogDelta`](crate::LogDelta) from an `mpsc::Receiver`, panicking on
/// timeout or channel closure. Evaluates to the delta.
#[macro_export]
macro_rules! assert_next_delta {
    ($receiver: expr) => {
        $crate::assert_next_delta!($receiver, timeout = 5)
    };
    ($receiver: expr, timeout = $secs: expr) => {{
        let message =
            tokio::time::timeout(std::time::Duration::from_secs($secs), $receiver.recv())
                .await
                .expect("timed out waiting for a log delta");
        match message {
            std::option::Option::Some(delta) => delta,
            std::option::Option::None => panic!("Expected a log delta, but channel was closed"),
        }
    }};
}

/// Asserts that no delta arrives within `millis` milliseconds (default 100).
#[macro_export]
macro_rules! assert_no_delta {
    ($receiver: expr) => {
        $crate::assert_no_delta!($receiver, millis = 100)
    };
    ($receiver: expr, millis = $millis: expr) => {
        let message = tokio::time::timeout(
            std::time::Duration::from_millis($millis),
            $receiver.recv(),
        )
        .await;
        if let Ok(message) = message {
            panic!("Expected no log delta, got: {message:?}");
        }
    };
}

/// Asserts that the channel is closed, draining nothing but the closure.
#[macro_export]
macro_rules! assert_closed {
    ($receiver: expr) => {
        $crate::assert_closed!($receiver, timeout = 5)
    };
    ($receiver: expr, timeout = $secs: expr) => {
        let message =
            tokio::time::timeout(std::time::Duration::from_secs($secs), $receiver.recv())
                .await
                .expect("timed out");
        assert!(message.is_none(), "Expected a closed channel, got: {message:?}");
    };
}
