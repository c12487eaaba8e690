//! Integration tests for loader and action invocation
//!
//! # Test Coverage
//!
//! - Missing handlers (405) and handlers that return nothing
//! - Thrown responses under both response modes
//! - Thrown and deferred redirects
//! - Load context, route params and request normalization
//! - Route matching and parent chains feeding invocations

use anyhow::anyhow;
use brrtstream::data::{
    call_route_action, call_route_loader, extract_data, DataFunction, DataFunctionArgs,
    HandlerOutput, HandlerResult, Invocation, LoadContext, LoaderResult, Thrown,
};
use brrtstream::deferred::{defer, Promise};
use brrtstream::error::DataError;
use brrtstream::response::{redirect, Response, ResponseInit, CATCH_HEADER};
use brrtstream::routes::{ParamVec, RouteModule, RouteTable};
use brrtstream::runtime_config::ResponseMode;
use brrtstream::data::DataRequest;
use http::Method;
use serde_json::json;
use url::Url;

fn invocation(route_id: &str, method: Method, url: &str, mode: ResponseMode) -> Invocation {
    Invocation {
        route_id: route_id.to_string(),
        request: DataRequest::new(method, Url::parse(url).unwrap()),
        context: LoadContext::empty(),
        params: ParamVec::new(),
        response_mode: mode,
    }
}

fn not_found(_args: DataFunctionArgs) -> HandlerResult {
    Err(Response::json_with_init(&json!({"missing": true}), ResponseInit::status(404)).into())
}

#[test]
fn test_post_without_action_is_405_naming_the_action() {
    let err = call_route_action(
        None,
        invocation("routes/posts", Method::POST, "http://app/posts?index", ResponseMode::Router),
    )
    .unwrap_err();

    assert_eq!(err.status(), 405);
    let message = err.to_string();
    assert!(message.contains("POST"), "{message}");
    assert!(message.contains("/posts?index"), "{message}");
    assert!(message.contains("`action`"), "{message}");
    assert!(message.contains("routes/posts"), "{message}");
}

#[test]
fn test_get_without_loader_is_405_naming_the_loader() {
    let err = call_route_loader(
        None,
        invocation("root", Method::GET, "http://app/?_data=root", ResponseMode::Router),
    )
    .unwrap_err();
    match &err {
        DataError::MethodNotAllowed { url, .. } => assert_eq!(url, "/?_data=root"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.to_string().contains("a `loader`"));
}

#[test]
fn test_undefined_return_names_the_route() {
    let loader = |_args: DataFunctionArgs| -> HandlerResult { Ok(HandlerOutput::Undefined) };
    let err = call_route_loader(
        Some(&loader),
        invocation("routes/empty", Method::GET, "http://app/empty", ResponseMode::Router),
    )
    .unwrap_err();

    assert!(matches!(err, DataError::ReturnedUndefined { .. }));
    assert_eq!(err.status(), 500);
    assert!(err.to_string().contains("routes/empty"));
}

#[test]
fn test_null_is_a_valid_answer() {
    let loader = |_args: DataFunctionArgs| -> HandlerResult { Ok(json!(null).into()) };
    let result = call_route_loader(
        Some(&loader),
        invocation("root", Method::GET, "http://app/", ResponseMode::Router),
    )
    .unwrap();
    match result {
        LoaderResult::Response(res) => assert_eq!(extract_data(&res).unwrap(), json!(null)),
        LoaderResult::Deferred(_) => panic!("expected a response"),
    }
}

#[test]
fn test_thrown_response_in_legacy_mode_is_returned_with_catch_header() {
    let result = call_route_loader(
        Some(&not_found),
        invocation("root", Method::GET, "http://app/", ResponseMode::Legacy),
    )
    .unwrap();
    let LoaderResult::Response(res) = result else {
        panic!("expected a response");
    };
    assert_eq!(res.status, 404);
    assert_eq!(res.get_header(CATCH_HEADER), Some("yes"));
}

#[test]
fn test_thrown_response_in_router_mode_is_rethrown_with_catch_header() {
    let err = call_route_loader(
        Some(&not_found),
        invocation("root", Method::GET, "http://app/", ResponseMode::Router),
    )
    .unwrap_err();
    match err {
        DataError::Thrown(res) => {
            assert_eq!(res.status, 404);
            assert_eq!(res.get_header(CATCH_HEADER), Some("yes"));
            assert_eq!(extract_data(&res).unwrap(), json!({"missing": true}));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_thrown_redirect_is_never_tagged() {
    let action = |_args: DataFunctionArgs| -> HandlerResult { Err(redirect("/login").into()) };
    for mode in [ResponseMode::Legacy, ResponseMode::Router] {
        let res = call_route_action(
            Some(&action),
            invocation("root", Method::POST, "http://app/", mode),
        )
        .unwrap();
        assert_eq!(res.status, 302);
        assert_eq!(res.location(), Some("/login"));
        assert_eq!(res.get_header(CATCH_HEADER), None);
    }
}

#[test]
fn test_handler_errors_pass_through_unchanged() {
    let loader = |args: DataFunctionArgs| -> HandlerResult {
        let body = args.request.json()?;
        Err(anyhow!("bad input: {body}").into())
    };
    let inv = invocation("root", Method::POST, "http://app/", ResponseMode::Router);
    let inv = Invocation {
        request: inv.request.with_body(r#"{"n":1}"#),
        ..inv
    };
    match call_route_loader(Some(&loader), inv).unwrap_err() {
        DataError::Handler(err) => assert_eq!(err.to_string(), r#"bad input: {"n":1}"#),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_deferred_container_keeps_status_and_headers() {
    let loader = |_args: DataFunctionArgs| -> HandlerResult {
        Ok(defer()
            .value("a", 1)
            .pending("b", Promise::resolved(2))
            .status(201)
            .header("X-Custom", "yes")
            .build()?
            .into())
    };
    let result = call_route_loader(
        Some(&loader),
        invocation("root", Method::GET, "http://app/", ResponseMode::Router),
    )
    .unwrap();
    assert_eq!(result.status(), 201);
    match result {
        LoaderResult::Deferred(data) => {
            assert_eq!(data.init().get_header("x-custom"), Some("yes"));
            assert_eq!(data.pending_count(), 1);
        }
        LoaderResult::Response(_) => panic!("expected deferred data"),
    }
}

#[test]
fn test_invalid_deferred_container_is_a_handler_error() {
    let loader = |_args: DataFunctionArgs| -> HandlerResult {
        Ok(defer().value("a", 1).value("a", 2).build()?.into())
    };
    let err = call_route_loader(
        Some(&loader),
        invocation("root", Method::GET, "http://app/", ResponseMode::Router),
    )
    .unwrap_err();
    assert!(matches!(err, DataError::Handler(_)));
}

#[derive(Debug)]
struct Session {
    user: &'static str,
}

#[test]
fn test_context_params_and_normalized_request_reach_the_handler() {
    let table = RouteTable::new();
    table.add(RouteModule::new("root", "/"));
    table.add(
        RouteModule::new("post", "/posts/:id")
            .parent("root")
            .loader(|args: DataFunctionArgs| -> HandlerResult {
                let user = args
                    .context
                    .get::<Session>()
                    .map(|s| s.user)
                    .ok_or_else(|| Thrown::from(anyhow!("no session")))?;
                Ok(json!({
                    "id": args.param("id"),
                    "user": user,
                    "query": args.request.url.query(),
                })
                .into())
            }),
    );

    let matched = table.match_path("/posts/42?_data=post&index=").unwrap();
    let leaf = matched.leaf().unwrap();
    assert_eq!(leaf.id, "post");
    let ids: Vec<&str> = matched.chain.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["root", "post"]);

    let inv = Invocation {
        route_id: leaf.id.clone(),
        request: DataRequest::new(
            Method::GET,
            Url::parse("http://app/posts/42?_data=post&index=&q=x").unwrap(),
        ),
        context: LoadContext::new(Session { user: "ada" }),
        params: matched.params.clone(),
        response_mode: ResponseMode::Router,
    };
    let loader: Option<&dyn DataFunction> = leaf.loader.as_deref();
    let LoaderResult::Response(res) = call_route_loader(loader, inv).unwrap() else {
        panic!("expected a response");
    };
    assert_eq!(
        extract_data(&res).unwrap(),
        json!({"id": "42", "user": "ada", "query": "q=x"})
    );
}

#[test]
fn test_route_table_swaps_are_visible_to_new_matches() {
    let table = RouteTable::new();
    table.add(RouteModule::new("a", "/a"));
    assert!(table.match_path("/b").is_none());
    table.replace_all(vec![RouteModule::new("b", "/b")]);
    assert!(table.match_path("/a").is_none());
    assert_eq!(table.match_path("/b").unwrap().leaf().unwrap().id, "b");
    assert!(table.remove("b"));
    assert!(table.is_empty());
}
