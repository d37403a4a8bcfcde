//! Property tests for receiver pool sizing
//!
//! After a rebuild, the pool lengths must equal the configured thread
//! counts for any value, zero included.

use gcast::{Reconnectable, TransportConfig, UdpTransport};
use gcast_transport::DiagnosticsConfig;
use proptest::prelude::*;

fn test_config(mcast_threads: usize, ucast_threads: usize) -> TransportConfig {
    TransportConfig {
        bind_addr: "127.0.0.1".parse().unwrap(),
        mcast_group: "239.255.12.12".parse().unwrap(),
        mcast_port: 0,
        ucast_port: 0,
        mcast_iface: "127.0.0.1".parse().unwrap(),
        multicast_receiver_threads: mcast_threads,
        unicast_receiver_threads: ucast_threads,
        diagnostics: DiagnosticsConfig {
            enabled: false,
            bind_addr: "127.0.0.1".parse().unwrap(),
            port: 0,
        },
        ..Default::default()
    }
}

proptest! {
    // Each case binds real sockets and spawns threads; keep the case
    // count low.
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn pool_sizes_match_configuration(mcast in 0usize..5, ucast in 0usize..5) {
        let (transport, _inbound) = UdpTransport::new(test_config(mcast, ucast)).unwrap();

        let report = transport.reconnect().unwrap();
        prop_assert!(report.diagnostics_ok());

        let stats = transport.stats();
        prop_assert!(stats.sockets_valid);
        prop_assert_eq!(stats.mcast_receivers, mcast);
        prop_assert_eq!(stats.ucast_receivers, ucast);
        prop_assert_eq!(stats.stale_receivers, 0);

        transport.stop();
        let stats = transport.stats();
        prop_assert_eq!(stats.mcast_receivers, 0);
        prop_assert_eq!(stats.ucast_receivers, 0);
        prop_assert!(!stats.sockets_valid);
    }
}
