//! Value marshalling between QuickJS and the typed value model
//!
//! Wrapped records are `HostRecord` class instances carrying `__type__` and
//! one function per shape method. The native record lives inside the
//! instance, so it is released when the wrapper is collected and cannot be
//! forged from script.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rquickjs::class::{ClassId, JsClass, Readable, Trace, Tracer};
use rquickjs::function::{Constructor, Rest, This};
use rquickjs::{Array, Class, Ctx, Exception, Function, IntoJs, Object, Value as JsValue};

use script_types::{AggregateValue, MapKey, RecordValue, Type, Value};

use crate::bridge::{BridgeValue, HostBridge};

const TYPE_KEY: &str = "__type__";

/// Nesting limit for values read out of JavaScript; cyclic objects hit it
pub const MAX_DEPTH: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Host Record Class
// ─────────────────────────────────────────────────────────────────────────────

/// JS class holding one wrapped native record
pub struct HostRecord {
    record: RecordValue,
    live: Arc<AtomicUsize>,
}

impl HostRecord {
    fn new(record: RecordValue, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self { record, live }
    }
}

impl Drop for HostRecord {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

impl<'js> Trace<'js> for HostRecord {
    fn trace<'a>(&self, _tracer: Tracer<'a, 'js>) {}
}

impl<'js> JsClass<'js> for HostRecord {
    const NAME: &'static str = "HostRecord";

    type Mutable = Readable;

    fn class_id() -> &'static ClassId {
        static ID: ClassId = ClassId::new();
        &ID
    }

    fn prototype(ctx: &Ctx<'js>) -> rquickjs::Result<Option<Object<'js>>> {
        Object::new(ctx.clone()).map(Some)
    }

    fn constructor(_ctx: &Ctx<'js>) -> rquickjs::Result<Option<Constructor<'js>>> {
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Marshal
// ─────────────────────────────────────────────────────────────────────────────

/// Converter bound to one runtime's bridge
#[derive(Debug, Clone)]
pub struct Marshal {
    bridge: Arc<HostBridge>,
    live: Arc<AtomicUsize>,
}

impl Marshal {
    pub fn new(bridge: Arc<HostBridge>) -> Self {
        Self {
            bridge,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn bridge(&self) -> &Arc<HostBridge> {
        &self.bridge
    }

    /// Wrapped records not yet collected
    pub fn live_records(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Native record behind a wrapper instance
    fn unwrap_record(&self, js: &JsValue<'_>) -> Option<RecordValue> {
        let instance = js.clone().get::<Class<HostRecord>>().ok()?;
        let record = instance.borrow().record.clone();
        Some(record)
    }

    /// Classify a JS `this` for bridge dispatch
    pub fn this_value(&self, this: &JsValue<'_>) -> BridgeValue {
        self.unwrap_record(this)
            .map(BridgeValue::Wrapped)
            .unwrap_or_else(BridgeValue::null)
    }

    /// Convert a JS value into a typed value
    pub fn from_js(&self, js: JsValue<'_>) -> rquickjs::Result<Value> {
        self.from_js_at(js, 0)
    }

    fn from_js_at(&self, js: JsValue<'_>, depth: usize) -> rquickjs::Result<Value> {
        if depth > MAX_DEPTH {
            return Err(Exception::throw_type(
                js.ctx(),
                &format!("value nested deeper than {} levels (cyclic?)", MAX_DEPTH),
            ));
        }
        Ok(match js.type_of() {
            rquickjs::Type::Bool => Value::Bool(js.get()?),
            rquickjs::Type::Int => Value::Int(js.get::<i32>()? as i64),
            rquickjs::Type::Float => Value::Float(js.get()?),
            rquickjs::Type::String => Value::String(js.get()?),
            rquickjs::Type::Array => {
                let arr: Array = js.get()?;
                let mut items = Vec::with_capacity(arr.len());
                for item in arr.iter::<JsValue>() {
                    items.push(self.from_js_at(item?, depth + 1)?);
                }
                Value::Aggregate(AggregateValue::list(Type::Any, items))
            }
            rquickjs::Type::Object => {
                if let Some(record) = self.unwrap_record(&js) {
                    return Ok(Value::Record(record));
                }
                let obj: Object = js.get()?;
                let type_name: Option<String> = obj.get(TYPE_KEY).ok().flatten();
                let mut fields = Vec::new();
                for prop in obj.props::<String, JsValue>() {
                    let (key, val) = prop?;
                    if key != TYPE_KEY {
                        fields.push((key, self.from_js_at(val, depth + 1)?));
                    }
                }
                match type_name {
                    Some(type_name) => {
                        let mut record = RecordValue::new(type_name);
                        for (k, v) in fields {
                            record.set(k, v);
                        }
                        Value::Record(record)
                    }
                    None => Value::Aggregate(AggregateValue::map(
                        Type::String,
                        Type::Any,
                        fields.into_iter().map(|(k, v)| (MapKey::String(k), v)),
                    )),
                }
            }
            _ => Value::Void,
        })
    }

    /// Convert a bridge value into a JS value, wrapping shaped records
    pub fn to_js<'js>(&self, ctx: &Ctx<'js>, value: BridgeValue) -> rquickjs::Result<JsValue<'js>> {
        match value {
            BridgeValue::Primitive(Value::Void) => Ok(JsValue::new_null(ctx.clone())),
            BridgeValue::Primitive(Value::Bool(b)) => Ok(JsValue::new_bool(ctx.clone(), b)),
            BridgeValue::Primitive(Value::Int(i)) => Ok(match i32::try_from(i) {
                Ok(small) => JsValue::new_int(ctx.clone(), small),
                Err(_) => JsValue::new_float(ctx.clone(), i as f64),
            }),
            BridgeValue::Primitive(Value::Float(f)) => Ok(JsValue::new_float(ctx.clone(), f)),
            BridgeValue::Primitive(Value::String(s)) => s.into_js(ctx),
            BridgeValue::Primitive(other) => Err(Exception::throw_type(
                ctx,
                &format!("cannot pass {} as a primitive", other.ty()),
            )),
            BridgeValue::Array(items) => {
                let arr = Array::new(ctx.clone())?;
                for (i, item) in items.into_iter().enumerate() {
                    arr.set(i, self.to_js(ctx, item)?)?;
                }
                Ok(arr.into_value())
            }
            BridgeValue::Object(fields) => {
                let obj = Object::new(ctx.clone())?;
                for (key, val) in fields {
                    obj.set(key, self.to_js(ctx, val)?)?;
                }
                Ok(obj.into_value())
            }
            BridgeValue::Wrapped(record) => Ok(self.wrap(ctx, record)?.into_value()),
            BridgeValue::Opaque(type_name) => Err(Exception::throw_type(
                ctx,
                &format!("{} cannot be passed to JavaScript", type_name),
            )),
        }
    }

    /// Build the enumerated wrapper instance for a shaped record
    fn wrap<'js>(&self, ctx: &Ctx<'js>, record: RecordValue) -> rquickjs::Result<Object<'js>> {
        let type_name = record.type_name.clone();
        let methods: Vec<String> = self
            .bridge
            .shapes()
            .shape_for(&record)
            .map(|shape| shape.method_names().map(str::to_string).collect())
            .unwrap_or_default();

        let instance = Class::instance(ctx.clone(), HostRecord::new(record, self.live.clone()))?;
        let value = instance.into_js(ctx)?;
        let obj = value
            .as_object()
            .cloned()
            .ok_or_else(|| Exception::throw_type(ctx, "record wrapper is not an object"))?;
        obj.set(TYPE_KEY, type_name)?;

        for method in methods {
            let marshal = self.clone();
            let name = method.clone();
            let func = Function::new(
                ctx.clone(),
                move |ctx: Ctx<'js>, this: This<JsValue<'js>>, args: Rest<JsValue<'js>>| {
                    marshal.call_method(&ctx, &name, &this.0, args.0)
                },
            )?;
            obj.set(method, func)?;
        }
        Ok(obj)
    }

    /// JS-facing entry point of a wrapped record method
    fn call_method<'js>(
        &self,
        ctx: &Ctx<'js>,
        method: &str,
        this: &JsValue<'js>,
        args: Vec<JsValue<'js>>,
    ) -> rquickjs::Result<JsValue<'js>> {
        let this_value = self.this_value(this);
        let args = args
            .into_iter()
            .map(|a| self.from_js(a))
            .collect::<rquickjs::Result<Vec<_>>>()?;

        match self.bridge.call(method, &this_value, &args) {
            Ok(result) => self.to_js(ctx, result),
            Err(e) if e.yields_null() => {
                tracing::error!(target: "script_js::bridge", method, error = %e, "Bridge call failed");
                Ok(JsValue::new_null(ctx.clone()))
            }
            Err(e) => Err(Exception::throw_message(ctx, &e.to_string())),
        }
    }

    /// Export a native value for JS; leaks become null with an error log
    pub fn export_to_js<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        value: Value,
    ) -> rquickjs::Result<JsValue<'js>> {
        match self.bridge.export(name, value) {
            Ok(exported) => self.to_js(ctx, exported),
            Err(e) => {
                tracing::error!(target: "script_js::bridge", name, error = %e, "Refusing to export value");
                Ok(JsValue::new_null(ctx.clone()))
            }
        }
    }
}
