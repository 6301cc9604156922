use std::sync::Arc;

use reconciler::{ReconcileError, Reconciler};
use registry::{
    Address, DelegateGrant, Event, InMemoryAuditSink, InMemoryRecordStore, MeteringPointQuery,
    MeteringPointType, MeteringPointUpdate, MeteringPointView, RecordStore, SqliteRecordStore,
    Technology, TechnologyCodes, TechnologyType,
};

fn reconcilers() -> Vec<(&'static str, Arc<dyn RecordStore>, Reconciler)> {
    let sqlite = SqliteRecordStore::open(":memory:").expect("sqlite");
    sqlite.ensure_schema().expect("schema");
    let stores: Vec<(&'static str, Arc<dyn RecordStore>)> = vec![
        ("memory", InMemoryRecordStore::shared() as Arc<dyn RecordStore>),
        ("sqlite", Arc::new(sqlite) as Arc<dyn RecordStore>),
    ];
    stores
        .into_iter()
        .map(|(name, store)| {
            let reconciler = Reconciler::new(store.clone(), InMemoryAuditSink::shared());
            (name, store, reconciler)
        })
        .collect()
}

fn added(gsrn: &str, sector: Option<&str>, meteringpoint_type: Option<MeteringPointType>) -> Event {
    Event::MeteringPointAdded {
        meteringpoint: MeteringPointUpdate {
            gsrn: gsrn.to_string(),
            sector: sector.map(str::to_string),
            meteringpoint_type,
            ..MeteringPointUpdate::default()
        },
    }
}

fn fetch_view(store: &dyn RecordStore, gsrn: &str) -> Option<MeteringPointView> {
    store
        .query(&MeteringPointQuery::new().has_gsrn(gsrn))
        .expect("query")
        .meteringpoints
        .pop()
}

fn codes() -> TechnologyCodes {
    TechnologyCodes::new("T020001", "F01050100")
}

fn technology_update() -> Event {
    Event::TechnologyUpdate {
        technology: Technology {
            tech_code: "T020001".to_string(),
            fuel_code: "F01050100".to_string(),
            technology_type: TechnologyType::Solar,
        },
    }
}

#[test]
fn repeated_add_is_idempotent() {
    for (name, store, reconciler) in reconcilers() {
        let event = added("gsrn1", Some("DK1"), Some(MeteringPointType::Production));
        reconciler.apply(&event).expect("first");
        let once = fetch_view(store.as_ref(), "gsrn1");
        reconciler.apply(&event).expect("second");
        assert_eq!(fetch_view(store.as_ref(), "gsrn1"), once, "{name}");
        let total = store.query(&MeteringPointQuery::new()).expect("query").total;
        assert_eq!(total, 1, "{name}");
    }
}

#[test]
fn update_merges_present_fields_only() {
    for (name, store, reconciler) in reconcilers() {
        reconciler
            .apply(&added("gsrn1", Some("DK1"), Some(MeteringPointType::Production)))
            .expect("add");
        reconciler
            .apply(&Event::MeteringPointUpdated {
                meteringpoint: MeteringPointUpdate {
                    gsrn: "gsrn1".to_string(),
                    sector: Some("DK2".to_string()),
                    ..MeteringPointUpdate::default()
                },
            })
            .expect("update");
        let view = fetch_view(store.as_ref(), "gsrn1").expect("view");
        assert_eq!(view.sector.as_deref(), Some("DK2"), "{name}");
        assert_eq!(view.meteringpoint_type, Some(MeteringPointType::Production), "{name}");
    }
}

#[test]
fn empty_sector_is_kept_distinct_from_absent() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&added("gsrn1", Some("DK1"), None)).expect("add");
        reconciler.apply(&added("gsrn1", Some(""), None)).expect("blank");
        let view = fetch_view(store.as_ref(), "gsrn1").expect("view");
        assert_eq!(view.sector.as_deref(), Some(""), "{name}");
    }
}

#[test]
fn technology_link_converges_in_either_order() {
    for (name, store, reconciler) in reconcilers() {
        let link = |gsrn: &str| Event::MeteringPointTechnologyUpdated {
            gsrn: gsrn.to_string(),
            codes: Some(codes()),
        };
        reconciler.apply(&added("early", None, None)).expect("add");
        reconciler.apply(&added("late", None, None)).expect("add");

        reconciler.apply(&link("early")).expect("link first");
        assert_eq!(fetch_view(store.as_ref(), "early").expect("view").technology, None, "{name}");
        reconciler.apply(&technology_update()).expect("technology");
        reconciler.apply(&link("late")).expect("link after");

        let early = fetch_view(store.as_ref(), "early").expect("view").technology;
        let late = fetch_view(store.as_ref(), "late").expect("view").technology;
        assert!(early.is_some(), "{name}");
        assert_eq!(early, late, "{name}");
    }
}

#[test]
fn technology_update_changes_type_only() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&technology_update()).expect("create");
        reconciler
            .apply(&Event::TechnologyUpdate {
                technology: Technology {
                    tech_code: "T020001".to_string(),
                    fuel_code: "F01050100".to_string(),
                    technology_type: TechnologyType::Wind,
                },
            })
            .expect("update");
        let mut tx = store.begin().expect("begin");
        let stored = tx.technology(&codes()).expect("read").expect("technology");
        assert_eq!(stored.technology_type, TechnologyType::Wind, "{name}");
    }
}

#[test]
fn technology_removal_leaves_link_unresolved() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&technology_update()).expect("technology");
        reconciler
            .apply(&Event::MeteringPointAdded {
                meteringpoint: MeteringPointUpdate {
                    gsrn: "gsrn1".to_string(),
                    technology: Some(codes()),
                    ..MeteringPointUpdate::default()
                },
            })
            .expect("add");
        assert!(fetch_view(store.as_ref(), "gsrn1").expect("view").technology.is_some(), "{name}");

        reconciler
            .apply(&Event::TechnologyRemoved { codes: codes() })
            .expect("remove");
        reconciler
            .apply(&Event::TechnologyRemoved { codes: codes() })
            .expect("remove again");
        let view = fetch_view(store.as_ref(), "gsrn1").expect("meteringpoint survives");
        assert_eq!(view.technology, None, "{name}");

        reconciler.apply(&technology_update()).expect("technology returns");
        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.technology_link("gsrn1").expect("link"), Some(codes()), "{name}");
    }
}

#[test]
fn clearing_technology_link() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&technology_update()).expect("technology");
        reconciler
            .apply(&Event::MeteringPointTechnologyUpdated {
                gsrn: "gsrn1".to_string(),
                codes: Some(codes()),
            })
            .expect("link");
        reconciler
            .apply(&Event::MeteringPointTechnologyUpdated {
                gsrn: "gsrn1".to_string(),
                codes: None,
            })
            .expect("clear");
        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.technology_link("gsrn1").expect("link"), None, "{name}");
    }
}

#[test]
fn address_is_replaced_wholesale_and_deleted_on_null() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&added("gsrn1", None, None)).expect("add");
        let first = Address {
            street_name: Some("Street".to_string()),
            building_number: Some("1".to_string()),
            ..Address::default()
        };
        let second = Address {
            city_name: Some("City".to_string()),
            ..Address::default()
        };
        for address in [&first, &second] {
            reconciler
                .apply(&Event::MeteringPointAddressUpdated {
                    gsrn: "gsrn1".to_string(),
                    address: Some(address.clone()),
                })
                .expect("address");
        }
        assert_eq!(fetch_view(store.as_ref(), "gsrn1").expect("view").address, Some(second), "{name}");

        reconciler
            .apply(&Event::MeteringPointAddressUpdated {
                gsrn: "gsrn1".to_string(),
                address: None,
            })
            .expect("delete");
        assert_eq!(fetch_view(store.as_ref(), "gsrn1").expect("view").address, None, "{name}");
    }
}

#[test]
fn removal_cascades_but_keeps_technology() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&technology_update()).expect("technology");
        reconciler
            .apply(&Event::MeteringPointAdded {
                meteringpoint: MeteringPointUpdate {
                    gsrn: "gsrn1".to_string(),
                    technology: Some(codes()),
                    address: Some(Address {
                        city_name: Some("City".to_string()),
                        ..Address::default()
                    }),
                    ..MeteringPointUpdate::default()
                },
            })
            .expect("add");
        for subject in ["foo", "bar"] {
            reconciler
                .apply(&Event::MeteringPointDelegateGranted {
                    delegate: DelegateGrant::new("gsrn1", subject),
                })
                .expect("grant");
        }

        let removed = Event::MeteringPointRemoved {
            gsrn: "gsrn1".to_string(),
        };
        reconciler.apply(&removed).expect("remove");
        reconciler.apply(&removed).expect("remove is idempotent");

        assert_eq!(fetch_view(store.as_ref(), "gsrn1"), None, "{name}");
        let mut tx = store.begin().expect("begin");
        assert_eq!(tx.address("gsrn1").expect("address"), None, "{name}");
        assert_eq!(tx.technology_link("gsrn1").expect("link"), None, "{name}");
        assert!(!tx.has_delegate(&DelegateGrant::new("gsrn1", "foo")).expect("delegate"), "{name}");
        assert!(tx.technology(&codes()).expect("technology").is_some(), "{name}");
    }
}

#[test]
fn delegate_grant_and_revoke_are_idempotent() {
    for (name, store, reconciler) in reconcilers() {
        reconciler.apply(&added("gsrn1", None, None)).expect("add");
        let grant = Event::MeteringPointDelegateGranted {
            delegate: DelegateGrant::new("gsrn1", "bar"),
        };
        reconciler.apply(&grant).expect("grant");
        reconciler.apply(&grant).expect("grant again");
        let scoped = MeteringPointQuery::new().is_accessible_by("bar");
        assert_eq!(store.query(&scoped).expect("query").total, 1, "{name}");

        let revoke = Event::MeteringPointDelegateRevoked {
            delegate: DelegateGrant::new("gsrn1", "bar"),
        };
        reconciler.apply(&revoke).expect("revoke");
        reconciler.apply(&revoke).expect("revoke again");
        assert_eq!(store.query(&scoped).expect("query").total, 0, "{name}");
    }
}

#[test]
fn malformed_events_are_rejected_without_writes() {
    for (name, store, reconciler) in reconcilers() {
        let err = reconciler.apply(&added("", Some("DK1"), None)).expect_err("rejected");
        assert!(matches!(err, ReconcileError::Malformed(_)), "{name}");
        assert_eq!(store.query(&MeteringPointQuery::new()).expect("query").total, 0, "{name}");
    }
}

#[test]
fn concurrent_partial_updates_to_one_gsrn_keep_every_field() {
    for (name, store, reconciler) in reconcilers() {
        std::thread::scope(|scope| {
            for index in 0..8 {
                let reconciler = &reconciler;
                scope.spawn(move || {
                    let partial = if index % 2 == 0 {
                        added("gsrn1", Some("DK1"), None)
                    } else {
                        Event::MeteringPointUpdated {
                            meteringpoint: MeteringPointUpdate {
                                gsrn: "gsrn1".to_string(),
                                meteringpoint_type: Some(MeteringPointType::Production),
                                ..MeteringPointUpdate::default()
                            },
                        }
                    };
                    reconciler.apply(&partial).expect("merge");
                    reconciler
                        .apply(&Event::MeteringPointDelegateGranted {
                            delegate: DelegateGrant::new("gsrn1", format!("s{index}")),
                        })
                        .expect("grant");
                });
            }
        });

        assert_eq!(store.query(&MeteringPointQuery::new()).expect("query").total, 1, "{name}");
        let view = fetch_view(store.as_ref(), "gsrn1").expect("view");
        assert_eq!(view.sector.as_deref(), Some("DK1"), "{name}");
        assert_eq!(view.meteringpoint_type, Some(MeteringPointType::Production), "{name}");
        for index in 0..8 {
            let scoped = MeteringPointQuery::new().is_accessible_by(format!("s{index}"));
            assert_eq!(store.query(&scoped).expect("query").total, 1, "{name} s{index}");
        }
    }
}
