use pis::task::{TaskDefinition, real_name};
use pis::tasks;
use pis::TaskRegistry;

fn build_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    tasks::register_defaults(&mut registry);
    registry
}

fn definition(yaml: &str) -> TaskDefinition {
    serde_yaml::from_str(yaml).expect("test definition")
}

#[test]
fn real_name_is_the_first_token() {
    assert_eq!(real_name("foo bar"), "foo");
    assert_eq!(real_name("foo baz"), "foo");
    assert_eq!(real_name("foo"), "foo");
    assert_eq!(real_name(""), "");
}

#[test]
fn defaults_are_registered() {
    let registry = build_registry();
    assert_eq!(
        registry.known_tasks(),
        vec!["check_work_dir", "download", "hello_world"]
    );
    assert_eq!(registry.pretasks(), vec!["check_work_dir"]);
    assert!(registry.is_pretask("check_work_dir"));
    assert!(!registry.is_pretask("download"));
}

#[test]
fn suffixed_names_resolve_to_the_same_class() {
    let registry = build_registry();
    let a = definition("{name: hello_world first, destination: a.txt}");
    let b = definition("{name: hello_world second, destination: b.txt}");
    assert!(registry.instantiate(&a).is_ok());
    assert!(registry.instantiate(&b).is_ok());
}

#[test]
fn unknown_task_lists_known_names() {
    let registry = build_registry();
    let def = definition("{name: mystery, destination: x.txt}");
    let err = registry.instantiate(&def).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Unknown task 'mystery'"));
    assert!(message.contains("hello_world"));
}

#[test]
fn missing_required_fields_are_listed() {
    let registry = build_registry();
    let def = definition("{name: download daily}");
    let err = registry.instantiate(&def).unwrap_err();
    assert!(
        err.to_string().contains("destination, url"),
        "unexpected message: {err}"
    );
}

#[test]
fn instantiation_attaches_a_pending_manifest() {
    let registry = build_registry();
    let def = definition("{name: hello_world, destination: out.txt}");
    let instance = registry.instantiate(&def).unwrap();
    assert_eq!(instance.manifest.name, "hello_world");
    assert_eq!(instance.manifest.result, pis::Status::Pending);
    assert!(!instance.pretask);
}
