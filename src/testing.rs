//! Test doubles shared by unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::http::{Fetcher, GatewayRequest, ResponseSnapshot};

#[derive(Clone)]
enum Route {
  Respond(ResponseSnapshot),
  Fail,
  Hang,
}

#[derive(Default)]
struct FakeState {
  routes: HashMap<String, Route>,
  calls: HashMap<String, usize>,
}

/// Scriptable fetcher keyed by absolute URL. Unknown URLs fail like a
/// refused connection.
#[derive(Clone, Default)]
pub struct FakeFetcher {
  state: Arc<Mutex<FakeState>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  fn route(&self, url: &str, route: Route) {
    self.state.lock().unwrap().routes.insert(url.to_string(), route);
  }

  pub fn respond(&self, url: &str, snapshot: ResponseSnapshot) {
    self.route(url, Route::Respond(snapshot));
  }

  pub fn fail(&self, url: &str) {
    self.route(url, Route::Fail);
  }

  pub fn hang(&self, url: &str) {
    self.route(url, Route::Hang);
  }

  pub fn calls(&self, url: &str) -> usize {
    self.state.lock().unwrap().calls.get(url).copied().unwrap_or(0)
  }
}

impl Fetcher for FakeFetcher {
  fn fetch(
    &self,
    request: &GatewayRequest,
  ) -> impl Future<Output = Result<ResponseSnapshot>> + Send {
    let url = request.cache_key();
    let route = {
      let mut state = self.state.lock().unwrap();
      *state.calls.entry(url.clone()).or_default() += 1;
      state.routes.get(&url).cloned().unwrap_or(Route::Fail)
    };

    async move {
      match route {
        Route::Respond(snapshot) => Ok(snapshot),
        Route::Fail => Err(eyre!("connection refused: {}", url)),
        Route::Hang => {
          std::future::pending::<()>().await;
          Err(eyre!("unreachable"))
        }
      }
    }
  }
}
