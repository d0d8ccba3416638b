//! Identifier resolution along the environment chain

use crate::atom::Atom;
use crate::engine::Engine;
use crate::env::EnvKind;
use crate::error::JsError;
use crate::gc::CellRef;
use crate::object::PropertyKey;
use crate::value::Value;

impl Engine {
    /// Innermost environment in the chain starting at `env` that binds `name`
    pub(crate) fn resolve_binding(
        &self,
        env: CellRef,
        name: Atom,
    ) -> Result<Option<CellRef>, JsError> {
        let mut current = Some(env);
        while let Some(e) = current {
            let record = self.heap.env(e)?;
            let found = match &record.kind {
                EnvKind::Declarative { bindings } | EnvKind::Function { bindings, .. } => {
                    bindings.contains_key(&name)
                }
                EnvKind::Object { object, .. } => {
                    self.has_property(*object, PropertyKey::Name(name))?
                }
                EnvKind::Static { name: bound, .. } => *bound == name,
            };
            if found {
                return Ok(Some(e));
            }
            current = record.outer;
        }
        Ok(None)
    }

    /// GetBindingValue on a resolved environment
    pub(crate) fn binding_value(
        &mut self,
        env: CellRef,
        name: Atom,
        strict: bool,
    ) -> Result<Value, JsError> {
        let record = self.heap.env(env)?;
        let object = match &record.kind {
            EnvKind::Declarative { bindings } | EnvKind::Function { bindings, .. } => {
                return Ok(bindings.get(&name).map(|b| b.value).unwrap_or_default());
            }
            EnvKind::Static { value, .. } => return Ok(*value),
            EnvKind::Object { object, .. } => *object,
        };
        let key = PropertyKey::Name(name);
        if !self.has_property(object, key)? {
            return if strict {
                Err(JsError::not_defined(self.atoms.as_str(name)))
            } else {
                Ok(Value::Undefined)
            };
        }
        self.get_property(object, key, Value::Cell(object))
    }

    /// SetMutableBinding on a resolved environment
    pub(crate) fn set_binding(
        &mut self,
        env: CellRef,
        name: Atom,
        value: Value,
        strict: bool,
    ) -> Result<(), JsError> {
        let record = self.heap.env_mut(env)?;
        let object = match &mut record.kind {
            EnvKind::Declarative { bindings } | EnvKind::Function { bindings, .. } => {
                if let Some(binding) = bindings.get_mut(&name) {
                    if binding.mutable {
                        binding.value = value;
                    } else if strict {
                        return Err(JsError::type_error("mutating immutable binding not allowed"));
                    }
                }
                return Ok(());
            }
            EnvKind::Static {
                value: slot,
                mutable,
                ..
            } => {
                if *mutable {
                    *slot = value;
                } else if strict {
                    return Err(JsError::type_error("mutating immutable binding not allowed"));
                }
                return Ok(());
            }
            EnvKind::Object { object, .. } => *object,
        };
        self.put_property(object, PropertyKey::Name(name), value, Value::Cell(object), strict)
    }

    fn current_env(&self) -> Result<CellRef, JsError> {
        self.frames
            .last()
            .map(|f| f.lexical_env)
            .ok_or_else(|| JsError::internal_error("no active frame"))
    }

    fn current_strict(&self) -> bool {
        self.frames.last().is_some_and(|f| f.exec.strict)
    }

    /// `LOAD_NAME`
    pub(crate) fn load_name(&mut self, name: Atom) -> Result<Value, JsError> {
        let env = self.current_env()?;
        match self.resolve_binding(env, name)? {
            Some(found) => {
                let strict = self.current_strict();
                self.binding_value(found, name, strict)
            }
            None => Err(JsError::not_defined(self.atoms.as_str(name))),
        }
    }

    /// `STORE_NAME`: unresolved names become globals outside strict code
    pub(crate) fn store_name(&mut self, name: Atom, value: Value) -> Result<(), JsError> {
        let env = self.current_env()?;
        let strict = self.current_strict();
        match self.resolve_binding(env, name)? {
            Some(found) => self.set_binding(found, name, value, strict),
            None if strict => Err(JsError::reference_error(
                "putting to unresolvable reference not allowed in strict reference",
            )),
            None => {
                let global = self.realm.global;
                self.put_property(global, PropertyKey::Name(name), value, Value::Cell(global), false)
            }
        }
    }

    /// `CALL_NAME`: the function and the implicit `this` of its binding
    pub(crate) fn call_name(&mut self, name: Atom) -> Result<(Value, Value), JsError> {
        let env = self.current_env()?;
        let Some(found) = self.resolve_binding(env, name)? else {
            return Err(JsError::not_defined(self.atoms.as_str(name)));
        };
        let strict = self.current_strict();
        let func = self.binding_value(found, name, strict)?;
        let this = self.heap.env(found)?.implicit_this();
        Ok((func, this))
    }

    /// `DELETE_NAME`
    pub(crate) fn delete_name(&mut self, name: Atom) -> Result<bool, JsError> {
        let env = self.current_env()?;
        let Some(found) = self.resolve_binding(env, name)? else {
            return Ok(true);
        };
        let record = self.heap.env_mut(found)?;
        let object = match &mut record.kind {
            EnvKind::Declarative { bindings } | EnvKind::Function { bindings, .. } => {
                let deletable = bindings.get(&name).is_some_and(|b| b.deletable);
                if deletable {
                    bindings.shift_remove(&name);
                }
                return Ok(deletable);
            }
            EnvKind::Static { .. } => return Ok(false),
            EnvKind::Object { object, .. } => *object,
        };
        self.delete_property(object, PropertyKey::Name(name), false)
    }

    /// `TYPEOF_NAME`: unresolved names are "undefined" rather than errors
    pub(crate) fn typeof_name(&mut self, name: Atom) -> Result<Value, JsError> {
        let env = self.current_env()?;
        let value = match self.resolve_binding(env, name)? {
            Some(found) => {
                let strict = self.current_strict();
                self.binding_value(found, name, strict)?
            }
            None => Value::Undefined,
        };
        self.typeof_value(value)
    }
}
