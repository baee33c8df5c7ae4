//! A dead-simple router implementation
//!
//! A `Router` simply matches a request path against installed mount
//! prefixes, in the order they have been added, dispatching to the first
//! handler that matches.

use crate::server::{Handler, Request, Response};
use crate::server::response::error_messages::*;
use crate::uri::strip_mount;

pub struct Router {
    routes: Vec<Route>
}

struct Route {
    prefix: String,
    methods: Vec<String>,
    handler: Box<dyn Handler>
}

impl Router {
    /// Initialize a new, empty router
    pub fn new() -> Router {
        Router { routes: Vec::new() }
    }

    /// Create a route that will invoke the given `handler`, but only for the
    /// listed `methods`. Other methods get a `405`.
    pub fn route<H: Handler + 'static>(&mut self, prefix: &str,
                                       methods: &[&str], handler: H)
    {
        self.routes.push(Route {
            prefix: String::from(prefix),
            methods: methods.iter().map(|&m| String::from(m)).collect(),
            handler: Box::new(handler)
        });
    }
}

impl Handler for Router {
    fn handle(&self, req: &Request) -> Response {
        for route in &self.routes {
            if strip_mount(&req.path, &route.prefix).is_some() {
                return route.handle(req);
            }
        }

        error_404()
    }
}

impl Handler for Route {
    fn handle(&self, req: &Request) -> Response {
        if self.methods.iter().any(|m| *m == req.method) {
            self.handler.handle(req)
        }
        else {
            let mut res = error_405();
            res.headers.append("Allow", self.methods.join(", ").into_bytes());
            res
        }
    }
}
