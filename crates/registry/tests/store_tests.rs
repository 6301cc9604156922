use std::sync::Arc;

use registry::{
    Address, DelegateGrant, InMemoryRecordStore, MeteringPoint, MeteringPointFilters,
    MeteringPointOrdering, MeteringPointOrderingKey, MeteringPointQuery, MeteringPointType, Order,
    Pagination, RecordStore, SqliteRecordStore, Technology, TechnologyCodes, TechnologyType,
};

fn stores() -> Vec<(&'static str, Arc<dyn RecordStore>)> {
    let sqlite = SqliteRecordStore::open(":memory:").expect("sqlite");
    sqlite.ensure_schema().expect("schema");
    vec![
        ("memory", InMemoryRecordStore::shared() as Arc<dyn RecordStore>),
        ("sqlite", Arc::new(sqlite) as Arc<dyn RecordStore>),
    ]
}

fn seed(store: &dyn RecordStore, rows: &[(&str, MeteringPointType, &str)], subject: &str) {
    let mut tx = store.begin().expect("begin");
    for (gsrn, meteringpoint_type, sector) in rows {
        tx.save_meteringpoint(&MeteringPoint {
            gsrn: gsrn.to_string(),
            sector: Some(sector.to_string()),
            meteringpoint_type: Some(*meteringpoint_type),
        })
        .expect("save");
        tx.insert_delegate(&DelegateGrant::new(*gsrn, subject))
            .expect("delegate");
    }
    tx.commit().expect("commit");
}

fn four_points(store: &dyn RecordStore) {
    seed(
        store,
        &[
            ("gsrn0", MeteringPointType::Consumption, "DK1"),
            ("gsrn1", MeteringPointType::Consumption, "DK2"),
            ("gsrn2", MeteringPointType::Production, "DK1"),
            ("gsrn3", MeteringPointType::Production, "DK2"),
        ],
        "bar",
    );
}

fn gsrns(store: &dyn RecordStore, query: &MeteringPointQuery) -> (u64, Vec<String>) {
    let page = store.query(query).expect("query");
    (
        page.total,
        page.meteringpoints.into_iter().map(|view| view.gsrn).collect(),
    )
}

#[test]
fn sector_filter_scoped_to_subject() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        let filters = MeteringPointFilters {
            sector: Some(vec!["DK1".to_string()]),
            ..MeteringPointFilters::default()
        };
        let query = MeteringPointQuery::new()
            .is_accessible_by("bar")
            .apply_filters(&filters)
            .paginate(Pagination::new(0, 10).expect("page"));
        assert_eq!(
            gsrns(store.as_ref(), &query),
            (2, vec!["gsrn0".to_string(), "gsrn2".to_string()]),
            "{name}"
        );
    }
}

#[test]
fn gsrn_filter_returns_exact_subset() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        let filters = MeteringPointFilters {
            gsrn: Some(vec!["gsrn1".to_string(), "gsrn3".to_string(), "missing".to_string()]),
            ..MeteringPointFilters::default()
        };
        let query = MeteringPointQuery::new().apply_filters(&filters);
        assert_eq!(
            gsrns(store.as_ref(), &query),
            (2, vec!["gsrn1".to_string(), "gsrn3".to_string()]),
            "{name}"
        );

        let empty = MeteringPointFilters {
            gsrn: Some(Vec::new()),
            ..MeteringPointFilters::default()
        };
        let query = MeteringPointQuery::new().apply_filters(&empty);
        assert_eq!(gsrns(store.as_ref(), &query), (0, Vec::new()), "{name}");
    }
}

#[test]
fn type_filter_and_access_scope_combine() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        seed(
            store.as_ref(),
            &[("gsrn4", MeteringPointType::Production, "DK1")],
            "foo",
        );
        let filters = MeteringPointFilters {
            meteringpoint_type: Some(MeteringPointType::Production),
            ..MeteringPointFilters::default()
        };
        let query = MeteringPointQuery::new()
            .is_accessible_by("bar")
            .apply_filters(&filters);
        assert_eq!(
            gsrns(store.as_ref(), &query),
            (2, vec!["gsrn2".to_string(), "gsrn3".to_string()]),
            "{name}"
        );

        let query = MeteringPointQuery::new().is_accessible_by("nobody");
        assert_eq!(gsrns(store.as_ref(), &query), (0, Vec::new()), "{name}");
    }
}

#[test]
fn ordering_ties_keep_insertion_order() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        let query = MeteringPointQuery::new().apply_ordering(MeteringPointOrdering {
            key: MeteringPointOrderingKey::Sector,
            order: Order::Asc,
        });
        assert_eq!(
            gsrns(store.as_ref(), &query).1,
            vec!["gsrn0", "gsrn2", "gsrn1", "gsrn3"],
            "{name}"
        );

        let query = MeteringPointQuery::new().apply_ordering(MeteringPointOrdering {
            key: MeteringPointOrderingKey::Type,
            order: Order::Desc,
        });
        assert_eq!(
            gsrns(store.as_ref(), &query).1,
            vec!["gsrn2", "gsrn3", "gsrn0", "gsrn1"],
            "{name}"
        );

        let query = MeteringPointQuery::new().apply_ordering(MeteringPointOrdering {
            key: MeteringPointOrderingKey::Gsrn,
            order: Order::Desc,
        });
        assert_eq!(
            gsrns(store.as_ref(), &query).1,
            vec!["gsrn3", "gsrn2", "gsrn1", "gsrn0"],
            "{name}"
        );
    }
}

#[test]
fn pagination_past_end_keeps_total() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        let query = MeteringPointQuery::new().paginate(Pagination::new(9999, 2).expect("page"));
        assert_eq!(gsrns(store.as_ref(), &query), (4, Vec::new()), "{name}");

        let query = MeteringPointQuery::new().paginate(Pagination::new(1, 2).expect("page"));
        assert_eq!(
            gsrns(store.as_ref(), &query),
            (4, vec!["gsrn1".to_string(), "gsrn2".to_string()]),
            "{name}"
        );
    }
}

#[test]
fn technology_and_address_resolve_at_read_time() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        let codes = TechnologyCodes::new("T010101", "F01040100");
        let address = Address {
            street_name: Some("Vej".to_string()),
            city_name: Some("By".to_string()),
            ..Address::default()
        };

        let mut tx = store.begin().expect("begin");
        tx.save_technology_link("gsrn0", &codes).expect("link");
        tx.save_address("gsrn0", &address).expect("address");
        tx.commit().expect("commit");

        let query = MeteringPointQuery::new().has_gsrn("gsrn0");
        let view = store.query(&query).expect("query").meteringpoints.remove(0);
        assert_eq!(view.technology, None, "{name}: dangling link resolves to null");
        assert_eq!(view.address, Some(address.clone()), "{name}");

        let mut tx = store.begin().expect("begin");
        tx.save_technology(&Technology {
            tech_code: codes.tech_code.clone(),
            fuel_code: codes.fuel_code.clone(),
            technology_type: TechnologyType::Wind,
        })
        .expect("technology");
        tx.commit().expect("commit");

        let view = store.query(&query).expect("query").meteringpoints.remove(0);
        assert_eq!(
            view.technology.map(|technology| technology.technology_type),
            Some(TechnologyType::Wind),
            "{name}"
        );

        let mut tx = store.begin().expect("begin");
        assert!(tx.delete_technology(&codes).expect("delete"));
        tx.commit().expect("commit");
        let view = store.query(&query).expect("query").meteringpoints.remove(0);
        assert_eq!(view.technology, None, "{name}");
    }
}

#[test]
fn dropped_transaction_rolls_back() {
    for (name, store) in stores() {
        {
            let mut tx = store.begin().expect("begin");
            tx.save_meteringpoint(&MeteringPoint::new("gsrn9")).expect("save");
        }
        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.meteringpoint("gsrn9").expect("read"), None, "{name}");
    }
}

#[test]
fn delegate_insert_is_idempotent() {
    for (name, store) in stores() {
        let grant = DelegateGrant::new("gsrn0", "bar");
        let mut tx = store.begin().expect("begin");
        assert!(tx.insert_delegate(&grant).expect("insert"), "{name}");
        assert!(!tx.insert_delegate(&grant).expect("insert again"), "{name}");
        assert!(tx.has_delegate(&grant).expect("has"), "{name}");
        assert_eq!(tx.delete_delegates("gsrn0").expect("delete all"), 1, "{name}");
        assert!(!tx.delete_delegate(&grant).expect("delete"), "{name}");
        tx.commit().expect("commit");
    }
}

#[test]
fn resave_keeps_insertion_position() {
    for (name, store) in stores() {
        four_points(store.as_ref());
        let mut tx = store.begin().expect("begin");
        let mut first = tx.meteringpoint("gsrn0").expect("read").expect("exists");
        first.sector = Some("DK2".to_string());
        tx.save_meteringpoint(&first).expect("save");
        tx.commit().expect("commit");

        let (_, order) = gsrns(store.as_ref(), &MeteringPointQuery::new());
        assert_eq!(order, vec!["gsrn0", "gsrn1", "gsrn2", "gsrn3"], "{name}");
    }
}

#[test]
fn memory_read_transactions_share_the_store_and_refuse_writes() {
    let store = InMemoryRecordStore::new();
    four_points(&store);
    let mut first = store.begin_read().expect("read");
    let mut second = store.begin_read().expect("read");
    let query = MeteringPointQuery::new();
    assert_eq!(first.query_meteringpoints(&query).expect("query").total, 4);
    assert_eq!(second.query_meteringpoints(&query).expect("query").total, 4);
    assert!(first.delete_meteringpoint("gsrn0").is_err());
    drop(first);
    drop(second);
    assert_eq!(store.query(&query).expect("query").total, 4);
}

#[test]
fn sqlite_file_serves_queries_while_a_writer_is_open() {
    let path = std::env::temp_dir().join(format!("meteringpoints-{}.sqlite", uuid::Uuid::new_v4()));
    let path_str = path.to_string_lossy().to_string();
    {
        let store = SqliteRecordStore::open(&path_str).expect("sqlite");
        store.ensure_schema().expect("schema");
        seed(&store, &[("gsrn0", MeteringPointType::Consumption, "DK1")], "foo");

        let mut writer = store.begin().expect("begin");
        writer
            .save_meteringpoint(&MeteringPoint {
                gsrn: "gsrn1".to_string(),
                sector: None,
                meteringpoint_type: None,
            })
            .expect("save");
        assert_eq!(store.query(&MeteringPointQuery::new()).expect("query").total, 1);

        let mut reader = store.begin_read().expect("read");
        assert!(reader.delete_meteringpoint("gsrn0").is_err());
        drop(reader);

        writer.commit().expect("commit");
        assert_eq!(store.query(&MeteringPointQuery::new()).expect("query").total, 2);
    }
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{path_str}{suffix}"));
    }
}
