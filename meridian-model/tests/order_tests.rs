use meridian_model::{ModelError, RefRequirement, SchemaCatalog, TypeOrder, TypeSchema};
use pretty_assertions::assert_eq;

fn engineering_catalog() -> SchemaCatalog {
    SchemaCatalog::new()
        .with_type(TypeSchema::new("Organization").scalar("name"))
        .with_type(
            TypeSchema::new("Project")
                .reference("owner", "Organization", RefRequirement::Required),
        )
        .with_type(
            TypeSchema::new("Product")
                .reference("owner", "Organization", RefRequirement::Optional)
                .inverse("where_used", "Acu"),
        )
        .with_type(
            TypeSchema::new("Acu")
                .reference("assembly", "Product", RefRequirement::HardRequired)
                .reference("component", "Product", RefRequirement::HardRequired),
        )
        .with_type(
            TypeSchema::new("Requirement")
                .reference("owner", "Project", RefRequirement::Required)
                .reference("allocated_to", "Acu", RefRequirement::Optional),
        )
        .with_type(TypeSchema::new("Person"))
}

fn assert_before(order: &TypeOrder, a: &str, b: &str) {
    assert!(
        order.position(a) < order.position(b),
        "{a} should precede {b} in {:?}",
        order.as_slice()
    );
}

#[test]
fn dependencies_precede_dependents() {
    let order = TypeOrder::resolve(&engineering_catalog()).unwrap();
    assert_before(&order, "Organization", "Project");
    assert_before(&order, "Product", "Acu");
    assert_before(&order, "Project", "Requirement");
    assert_eq!(order.len(), 6);
}

#[test]
fn independent_types_first_alphabetically() {
    let order = TypeOrder::resolve(&engineering_catalog()).unwrap();
    // Organization, Person and Product have no ordering dependencies.
    assert_eq!(
        order.as_slice(),
        &["Organization", "Person", "Product", "Acu", "Project", "Requirement"]
    );
}

#[test]
fn optional_references_do_not_order() {
    let catalog = SchemaCatalog::new()
        .with_type(TypeSchema::new("A").reference("b", "B", RefRequirement::Optional))
        .with_type(TypeSchema::new("B").reference("a", "A", RefRequirement::Optional));
    let order = TypeOrder::resolve(&catalog).unwrap();
    assert_eq!(order.as_slice(), &["A", "B"]);
}

#[test]
fn self_reference_is_ignored() {
    let catalog = SchemaCatalog::new().with_type(
        TypeSchema::new("Activity").reference("sub_activity_of", "Activity", RefRequirement::Required),
    );
    let order = TypeOrder::resolve(&catalog).unwrap();
    assert_eq!(order.as_slice(), &["Activity"]);
}

#[test]
fn reference_outside_catalog_is_ignored() {
    let catalog = SchemaCatalog::new()
        .with_type(TypeSchema::new("Port").reference("port_type", "PortType", RefRequirement::HardRequired));
    let order = TypeOrder::resolve(&catalog).unwrap();
    assert_eq!(order.as_slice(), &["Port"]);
}

#[test]
fn required_cycle_is_rejected() {
    let catalog = SchemaCatalog::new()
        .with_type(TypeSchema::new("A").reference("b", "B", RefRequirement::Required))
        .with_type(TypeSchema::new("B").reference("c", "C", RefRequirement::HardRequired))
        .with_type(TypeSchema::new("C").reference("a", "A", RefRequirement::Required))
        .with_type(TypeSchema::new("D"));
    match TypeOrder::resolve(&catalog) {
        Err(ModelError::CyclicDependency { types }) => {
            assert_eq!(types, vec!["A", "B", "C"]);
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
}

#[test]
fn cycle_error_message_names_types() {
    let catalog = SchemaCatalog::new()
        .with_type(TypeSchema::new("A").reference("b", "B", RefRequirement::Required))
        .with_type(TypeSchema::new("B").reference("a", "A", RefRequirement::Required));
    let err = TypeOrder::resolve(&catalog).unwrap_err();
    assert_eq!(
        err.to_string(),
        "cyclic required-reference dependency among types: A, B"
    );
}

#[test]
fn resolution_is_deterministic() {
    let a = TypeOrder::resolve(&engineering_catalog()).unwrap();
    let b = TypeOrder::resolve(&engineering_catalog()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn unknown_types_sort_into_final_bucket() {
    let order = TypeOrder::resolve(&engineering_catalog()).unwrap();
    assert_eq!(order.position("Flow"), order.len());
    assert!(!order.contains("Flow"));
    let mut types = vec!["Zeta", "Acu", "Alpha", "Organization"];
    types.sort_by_key(|t| {
        let (rank, name) = order.sort_key(t);
        (rank, name.to_string())
    });
    assert_eq!(types, vec!["Organization", "Acu", "Alpha", "Zeta"]);
}

#[test]
fn reversed_flips_ranks() {
    let order = TypeOrder::resolve(&engineering_catalog()).unwrap();
    let rev = order.reversed();
    assert_eq!(rev.as_slice().first(), order.as_slice().last());
    assert!(rev.position("Acu") < rev.position("Product"));
}

#[test]
fn empty_catalog_resolves_empty() {
    let order = TypeOrder::resolve(&SchemaCatalog::new()).unwrap();
    assert!(order.is_empty());
}
