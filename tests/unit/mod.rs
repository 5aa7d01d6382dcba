// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for valkey-topology.
//!
//! These tests run without any Valkey server and test the public building
//! blocks in isolation: addresses, `CLUSTER NODES` discovery, the topology
//! document, and slot planning.

mod endpoint_tests {
    use valkey_topology::Endpoint;

    #[test]
    fn test_canonical_forms() {
        assert_eq!(
            Endpoint::parse("127.0.0.1:7000").unwrap().to_string(),
            "127.0.0.1:7000"
        );
        assert_eq!(
            Endpoint::parse("127.0.0.1:7000@17000").unwrap().to_string(),
            "127.0.0.1:7000"
        );
        assert_eq!(Endpoint::parse("[::1]:7000").unwrap().to_string(), "[::1]:7000");
    }

    #[test]
    fn test_rejected_addresses() {
        for bad in ["", "127.0.0.1", "127.0.0.1:0", "127.0.0.1:70000", "::1:7000", "a b:1"] {
            assert!(Endpoint::parse(bad).is_err(), "{bad} should be rejected");
        }
    }
}

mod discovery_tests {
    use valkey_topology::client::{LinkStatus, NodeRole};
    use valkey_topology::topology::parse_observed;

    const NODES: &str = "\
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 master,fail - 1426238316232 1426238315000 5 disconnected
";

    #[test]
    fn test_observed_table_from_cluster_nodes() {
        let table = parse_observed(NODES).unwrap();
        assert_eq!(table.len(), 5);

        let slave = table.get("127.0.0.1:30004").unwrap();
        assert_eq!(slave.role, NodeRole::Slave);
        assert_eq!(slave.master_address.as_deref(), Some("127.0.0.1:30001"));

        let myself = table.get("127.0.0.1:30001").unwrap();
        assert_eq!(myself.slot_count(), 5461);

        let failed = table.get("127.0.0.1:30005").unwrap();
        assert_eq!(failed.link, LinkStatus::Disconnected);
        assert_eq!(table.disconnected().count(), 1);
    }

    #[test]
    fn test_unknown_master_fails_refresh() {
        let raw = "07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave ffff 0 0 4 connected\n";
        assert!(parse_observed(raw).is_err());
    }

    #[test]
    fn test_short_lines_skipped() {
        let raw = format!("{NODES}garbage line\n");
        assert_eq!(parse_observed(&raw).unwrap().len(), 5);
    }
}

mod document_tests {
    use std::fs;

    use valkey_topology::client::NodeRole;
    use valkey_topology::{Error, TopologyDocument};

    const DOC: &str = r#"{
	"Schema": [
		{"IP": "127.0.0.1:7000", "Type": 0, "Master": "", "Slot": [[0, 8191], [9000]], "Status": 1, "Id": "aaa"},
		{"IP": "127.0.0.1:7001", "Type": 1, "Master": "127.0.0.1:7000", "Slot": [], "Status": 1, "Id": "bbb"}
	],
	"Logfile": "/tmp/topology.log"
}
"#;

    #[test]
    fn test_load_and_save_preserve_document() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.json");
        fs::write(&input, DOC).unwrap();

        let document = TopologyDocument::load(&input).unwrap();
        assert_eq!(document.logfile, "/tmp/topology.log");
        assert_eq!(document.schema.len(), 2);

        document.save(&output).unwrap();
        let reloaded = TopologyDocument::load(&output).unwrap();
        assert_eq!(reloaded, document);

        let table = reloaded.to_table().unwrap();
        assert_eq!(table.get("127.0.0.1:7001").unwrap().role, NodeRole::Slave);
        assert_eq!(table.get("127.0.0.1:7000").unwrap().slot_count(), 8193);
    }

    #[test]
    fn test_missing_file_is_file_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TopologyDocument::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, Error::FileIo { .. }));
    }

    #[test]
    fn test_invalid_json_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();

        let err = TopologyDocument::load(&path).unwrap_err();
        assert!(matches!(err, Error::Document { path: Some(_), .. }));
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn test_out_of_range_slot_rejected() {
        let doc = r#"{"Schema": [{"IP": "127.0.0.1:7000", "Type": 0, "Slot": [[0, 16384]]}]}"#;
        assert!(TopologyDocument::from_json_str(doc).is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let doc = r#"{"Schema": [{"IP": "127.0.0.1:7000", "Type": 7}]}"#;
        let err = TopologyDocument::from_json_str(doc).unwrap_err();
        assert!(err.to_string().contains('7'));
    }
}

mod planner_tests {
    use valkey_topology::client::NodeRole;
    use valkey_topology::slots::{SlotRange, SlotStep, next_step};
    use valkey_topology::{NodeRecord, TopologyTable};

    fn table() -> TopologyTable {
        [
            NodeRecord::new("127.0.0.1:7000", NodeRole::Master)
                .with_slots([SlotRange::new(0, 99).unwrap()]),
            NodeRecord::new("127.0.0.1:7001", NodeRole::Master)
                .with_slots([SlotRange::new(100, 199).unwrap()]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_runs_stop_at_owner_boundaries() {
        let observed = table();
        assert_eq!(
            next_step(&observed, "127.0.0.1:7002", 50, 150),
            SlotStep::Migrate {
                source: "127.0.0.1:7000".to_string(),
                start: 50,
                end: 99,
            }
        );
        assert_eq!(
            next_step(&observed, "127.0.0.1:7001", 120, 150),
            SlotStep::AlreadyOwned { end: 150 }
        );
        assert_eq!(
            next_step(&observed, "127.0.0.1:7001", 500, 600),
            SlotStep::Assign { slot: 500 }
        );
    }
}
