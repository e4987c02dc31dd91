//! Generation of the Python driver that hosts generated code.
//!
//! The driver is trusted harness code. It applies resource limits,
//! pins determinism (seeded RNG, mock clock, fixed hash seed), installs
//! the dynamic import hook and network guard, explicitly instantiates
//! the declared adapter class, runs the bundle's emitted test suite,
//! and prints exactly one structured report line.

use crate::policy::{NetworkMode, PolicyProfile};

/// Name of the driver file written at the workspace root.
pub const DRIVER_FILE: &str = "modforge_driver.py";

const DRIVER_TEMPLATE: &str = r#"
import builtins
import json
import sys

REPORT = {
    "tests": [],
    "denied_imports": [],
    "artifacts": [],
    "resource": {"cpu_seconds": 0.0, "max_rss_bytes": 0},
    "adapter_loaded": False,
    "adapter_error": None,
    "harness_error": None,
}

def _finish():
    print("MODFORGE_REPORT:" + json.dumps(REPORT), flush=True)

# -- resource caps (harness-trusted imports happen before the hook) ----
try:
    import resource as _resource
    _resource.setrlimit(_resource.RLIMIT_CPU, (__CPU_SECONDS__, __CPU_SECONDS__))
    _resource.setrlimit(_resource.RLIMIT_AS, (__MEMORY_BYTES__, __MEMORY_BYTES__))
    _resource.setrlimit(_resource.RLIMIT_NPROC, (__MAX_PROCESSES__, __MAX_PROCESSES__))
    _resource.setrlimit(_resource.RLIMIT_NOFILE, (__MAX_OPEN_FILES__, __MAX_OPEN_FILES__))
except Exception:
    _resource = None

import importlib.util
import os
import random
import socket as _socket
import time as _time
import traceback
import unittest

# -- determinism: seeded RNG, mock clock, no host time exposure --------
random.seed(__RANDOM_SEED__)

class _MockClock:
    def __init__(self):
        self.now = 1_700_000_000.0
    def time(self):
        return self.now
    def sleep(self, seconds):
        self.now += max(0.0, float(seconds))

_clock = _MockClock()
_time.time = _clock.time
_time.sleep = _clock.sleep
_time.monotonic = _clock.time

# -- network guard ------------------------------------------------------
_NETWORK_MODE = "__NETWORK_MODE__"
_ALLOWED_HOSTS = set(json.loads('__ALLOWED_HOSTS__'))
_real_connect = _socket.socket.connect

def _guarded_connect(self, address):
    host = address[0] if isinstance(address, tuple) else str(address)
    if _NETWORK_MODE == "allowlist" and host in _ALLOWED_HOSTS:
        return _real_connect(self, address)
    raise OSError("network access to %r refused by policy" % (host,))

_socket.socket.connect = _guarded_connect

# -- dynamic import hook ------------------------------------------------
_MODULE_ROOT = os.path.abspath("modules")
_ALLOWED_PREFIXES = json.loads('__ALLOWED_PREFIXES__')
_base_import = builtins.__import__

def _allowed(name):
    for prefix in _ALLOWED_PREFIXES:
        if name == prefix or name.startswith(prefix + "."):
            return True
    return False

def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    caller = (globals or {}).get("__file__") or ""
    if level == 0 and os.path.abspath(caller).startswith(_MODULE_ROOT) and not _allowed(name):
        REPORT["denied_imports"].append({"name": name, "source": os.path.basename(caller)})
        raise ImportError("import of %r denied by policy" % (name,))
    return _base_import(name, globals, locals, fromlist, level)

builtins.__import__ = _guarded_import

# -- explicit adapter registry (no import-time side effects) ------------
_REGISTRY = {}

def register_adapter(module_id):
    def _wrap(cls):
        _REGISTRY[module_id] = cls
        return cls
    return _wrap

builtins.register_adapter = register_adapter

def _load_module(relpath, module_name):
    spec = importlib.util.spec_from_file_location(module_name, relpath)
    module = importlib.util.module_from_spec(spec)
    sys.modules[module_name] = module
    spec.loader.exec_module(module)
    return module

def _collect_artifacts(module_dir):
    for root, _dirs, files in os.walk(module_dir):
        for name in sorted(files):
            ext = name.rsplit(".", 1)[-1].lower()
            if ext not in ("png", "jpg", "jpeg", "svg"):
                continue
            rel = os.path.relpath(os.path.join(root, name))
            mime = {
                "png": "image/png",
                "jpg": "image/jpeg",
                "jpeg": "image/jpeg",
                "svg": "image/svg+xml",
            }[ext]
            series = []
            sidecar = os.path.join(root, name + ".series.json")
            if os.path.exists(sidecar):
                try:
                    with open(sidecar) as fh:
                        series = json.load(fh)
                except Exception:
                    series = []
            REPORT["artifacts"].append({"path": rel, "mime": mime, "series": series})

class _Recorder(unittest.TestResult):
    def addSuccess(self, test):
        REPORT["tests"].append({"id": test.id(), "passed": True, "message": ""})
    def addFailure(self, test, err):
        REPORT["tests"].append({
            "id": test.id(), "passed": False,
            "message": self._exc_info_to_string(err, test)[-500:],
        })
    def addError(self, test, err):
        self.addFailure(test, err)

def _main():
    module_dir = "__MODULE_DIR__"
    entrypoint = "__ENTRYPOINT__"
    test_files = json.loads('__TEST_FILES__')
    sys.path.insert(0, os.path.abspath(module_dir))

    entry = _load_module(os.path.join(module_dir, entrypoint), "modforge_adapter")
    if not _REGISTRY:
        REPORT["adapter_error"] = "entrypoint registered no adapter class"
    else:
        adapter_cls = next(iter(_REGISTRY.values()))
        adapter = adapter_cls()
        for method in ("fetch_raw", "transform", "get_schema"):
            if not callable(getattr(adapter, method, None)):
                REPORT["adapter_error"] = "adapter lacks callable %r" % (method,)
                break
        else:
            REPORT["adapter_loaded"] = True

    suite = unittest.TestSuite()
    loader = unittest.defaultTestLoader
    for idx, test_file in enumerate(test_files):
        module = _load_module(os.path.join(module_dir, test_file), "modforge_tests_%d" % idx)
        suite.addTests(loader.loadTestsFromModule(module))
    suite.run(_Recorder())

    _collect_artifacts(module_dir)

    if _resource is not None:
        usage = _resource.getrusage(_resource.RUSAGE_SELF)
        REPORT["resource"] = {
            "cpu_seconds": usage.ru_utime + usage.ru_stime,
            "max_rss_bytes": usage.ru_maxrss * 1024,
        }

try:
    _main()
except MemoryError:
    REPORT["harness_error"] = "memory cap exceeded"
except Exception:
    REPORT["harness_error"] = traceback.format_exc()[-800:]
_finish()
"#;

/// Render the driver for one run. `local_modules` are the bundle's own
/// file stems, importable by the generated tests.
#[must_use]
pub fn render_driver(
    profile: &PolicyProfile,
    mode: &NetworkMode,
    module_dir: &str,
    entrypoint: &str,
    test_files: &[String],
    local_modules: &[String],
) -> String {
    let (mode_name, hosts) = match mode {
        NetworkMode::None => ("none", Vec::new()),
        NetworkMode::Allowlist { hosts } => ("allowlist", hosts.clone()),
    };
    let mut prefixes = profile.allowed_import_prefixes();
    prefixes.extend(local_modules.iter().cloned());
    DRIVER_TEMPLATE
        .replace("__CPU_SECONDS__", &profile.cpu_seconds.to_string())
        .replace("__MEMORY_BYTES__", &profile.memory_bytes.to_string())
        .replace("__MAX_PROCESSES__", &profile.max_processes.to_string())
        .replace("__MAX_OPEN_FILES__", &profile.max_open_files.to_string())
        .replace("__RANDOM_SEED__", &profile.random_seed.to_string())
        .replace("__NETWORK_MODE__", mode_name)
        .replace(
            "__ALLOWED_HOSTS__",
            &serde_json::to_string(&hosts).expect("hosts serialize"),
        )
        .replace(
            "__ALLOWED_PREFIXES__",
            &serde_json::to_string(&prefixes).expect("prefixes serialize"),
        )
        .replace("__MODULE_DIR__", module_dir)
        .replace("__ENTRYPOINT__", entrypoint)
        .replace(
            "__TEST_FILES__",
            &serde_json::to_string(test_files).expect("test files serialize"),
        )
}
